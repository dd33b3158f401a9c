//! SQL commands.
//!
//! A [`Command`] describes one SQL operation and its execution options.
//! Every command gets a process-unique [`CommandId`] when it is created;
//! prepared statement caches are keyed by that id, never by the SQL text,
//! so two commands with identical text are cached independently.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::transaction::IsolationLevel;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// A SQL command and its execution options.
///
/// Commands are deliberately not `Clone`: a copy would either share the
/// identity (and so the prepared statement) by accident or silently lose it.
/// Reuse the same value, by reference, to reuse a prepared statement.
///
/// # Example
///
/// ```rust,ignore
/// let lookup = Command::new("SELECT name FROM users WHERE id = @id")
///     .with_prepare(true)
///     .with_name("user_lookup");
///
/// for id in ids {
///     let mut next = pool.query(&cancel, &lookup, vec![Param::named("id", id)]).await?;
///     // ...
/// }
/// ```
#[derive(Debug)]
pub struct Command {
    id: CommandId,
    sql: String,
    trunc_long_text: bool,
    prepare: bool,
    isolation: IsolationLevel,
    name: Option<String>,
}

impl Command {
    /// Create a new command from SQL text.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            id: CommandId::next(),
            sql: sql.into(),
            trunc_long_text: false,
            prepare: false,
            isolation: IsolationLevel::Default,
            name: None,
        }
    }

    /// Silently truncate text longer than its declared length instead of
    /// failing with [`Error::TextTruncated`](crate::Error::TextTruncated).
    #[must_use]
    pub fn with_trunc_long_text(mut self, enabled: bool) -> Self {
        self.trunc_long_text = enabled;
        self
    }

    /// Prepare the command once per connection and reuse the handle.
    #[must_use]
    pub fn with_prepare(mut self, enabled: bool) -> Self {
        self.prepare = enabled;
        self
    }

    /// Set the isolation level to run the command under.
    #[must_use]
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Set a name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get the identity key.
    #[must_use]
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Check if long text is truncated silently.
    #[must_use]
    pub fn trunc_long_text(&self) -> bool {
        self.trunc_long_text
    }

    /// Check if the command should be prepared and cached.
    #[must_use]
    pub fn prepare(&self) -> bool {
        self.prepare
    }

    /// Get the requested isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Get the command name, if one was set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs: the command name, or the start of the SQL text.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => {
                let sql = self.sql.trim();
                match sql.char_indices().nth(48) {
                    Some((cut, _)) => &sql[..cut],
                    None => sql,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new("SELECT 1");
        assert_eq!(cmd.sql(), "SELECT 1");
        assert!(!cmd.prepare());
        assert!(!cmd.trunc_long_text());
        assert_eq!(cmd.isolation(), IsolationLevel::Default);
        assert_eq!(cmd.name(), None);
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("exec report")
            .with_prepare(true)
            .with_trunc_long_text(true)
            .with_isolation(IsolationLevel::Snapshot)
            .with_name("report");
        assert!(cmd.prepare());
        assert!(cmd.trunc_long_text());
        assert_eq!(cmd.isolation(), IsolationLevel::Snapshot);
        assert_eq!(cmd.display_name(), "report");
    }

    #[test]
    fn test_identical_text_has_distinct_identity() {
        let a = Command::new("SELECT 1");
        let b = Command::new("SELECT 1");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
    }

    #[test]
    fn test_builder_keeps_identity() {
        let cmd = Command::new("SELECT 1");
        let id = cmd.id();
        let cmd = cmd.with_prepare(true);
        assert_eq!(cmd.id(), id);
    }

    #[test]
    fn test_display_name_shortens_sql() {
        let sql = format!("SELECT {}", "x, ".repeat(40));
        let cmd = Command::new(sql);
        assert_eq!(cmd.display_name().chars().count(), 48);
    }
}
