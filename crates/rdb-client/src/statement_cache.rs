//! Per-session cache of prepared statement handles.
//!
//! Handles are keyed by the [`CommandId`] of the command that was prepared,
//! never by SQL text: two `Command`s with identical text each get their own
//! handle. When the cache is full the least recently used handle is pushed
//! out and handed back to the caller, which releases it on the session.
//! Session resets drop every handle.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::command::{Command, CommandId};
use crate::driver::StatementHandle;

/// Handles kept per session unless the pool is configured otherwise.
pub const DEFAULT_MAX_STATEMENTS: usize = 256;

/// A handle and the command it was prepared for.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    handle: StatementHandle,
    command: CommandId,
    label: String,
}

impl PreparedStatement {
    /// Pair `handle` with the command it was prepared from.
    #[must_use]
    pub fn new(handle: StatementHandle, command: &Command) -> Self {
        Self {
            handle,
            command: command.id(),
            label: command.display_name().to_owned(),
        }
    }

    /// Driver handle.
    #[must_use]
    pub fn handle(&self) -> StatementHandle {
        self.handle
    }

    /// Identity of the command.
    #[must_use]
    pub fn command(&self) -> CommandId {
        self.command
    }
}

/// Bounded LRU map from command identity to prepared handle.
pub struct StatementCache {
    entries: LruCache<CommandId, PreparedStatement>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    /// A cache for `capacity` handles. Zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// The handle for `command`, if one is cached. Marks it recently used.
    pub fn get(&mut self, command: &Command) -> Option<StatementHandle> {
        let id = command.id();
        match self.entries.get(&id) {
            Some(entry) => {
                self.hits += 1;
                tracing::trace!(command = %id, handle = entry.handle.0, "prepared handle reused");
                Some(entry.handle)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether `id` has a handle, without touching recency.
    #[must_use]
    pub fn contains(&self, id: CommandId) -> bool {
        self.entries.contains(&id)
    }

    /// Cache `stmt`. When that pushes out another command's handle, the
    /// displaced entry is returned so its handle can be released.
    pub fn insert(&mut self, stmt: PreparedStatement) -> Option<PreparedStatement> {
        tracing::debug!(
            command = %stmt.command,
            name = %stmt.label,
            handle = stmt.handle.0,
            "prepared handle cached"
        );
        let key = stmt.command;
        match self.entries.push(key, stmt) {
            Some((old, displaced)) if old != key => Some(displaced),
            _ => None,
        }
    }

    /// Forget the handle for `id`.
    pub fn remove(&mut self, id: CommandId) -> Option<PreparedStatement> {
        self.entries.pop(&id)
    }

    /// Forget every handle, oldest first.
    pub fn clear(&mut self) -> Vec<PreparedStatement> {
        let dropped: Vec<_> =
            std::iter::from_fn(|| self.entries.pop_lru().map(|(_, s)| s)).collect();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "prepared handles dropped");
        }
        dropped
    }

    /// Handles currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most handles the cache keeps.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Lookups that found a handle.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that did not.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STATEMENTS)
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn prepared(handle: u64, command: &Command) -> PreparedStatement {
        PreparedStatement::new(StatementHandle(handle), command)
    }

    #[test]
    fn test_lookup_counts_hits_and_misses() {
        let mut cache = StatementCache::new(4);
        let cmd = Command::new("SELECT 1");

        assert_eq!(cache.get(&cmd), None);
        cache.insert(prepared(1, &cmd));
        assert_eq!(cache.get(&cmd), Some(StatementHandle(1)));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_keyed_by_command_identity() {
        let mut cache = StatementCache::new(4);
        let a = Command::new("SELECT 1");
        let b = Command::new("SELECT 1");
        cache.insert(prepared(1, &a));
        assert_eq!(cache.get(&b), None);
        cache.insert(prepared(2, &b));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a), Some(StatementHandle(1)));
    }

    #[test]
    fn test_full_cache_returns_least_recent() {
        let mut cache = StatementCache::new(2);
        let (a, b, c) = (Command::new("a"), Command::new("b"), Command::new("c"));
        cache.insert(prepared(1, &a));
        cache.insert(prepared(2, &b));
        cache.get(&a);

        let displaced = cache.insert(prepared(3, &c)).unwrap();
        assert_eq!(displaced.command(), b.id());
        assert_eq!(displaced.handle(), StatementHandle(2));
        assert!(cache.contains(a.id()));
        assert!(!cache.contains(b.id()));
    }

    #[test]
    fn test_replacing_a_handle_displaces_nothing() {
        let mut cache = StatementCache::new(1);
        let a = Command::new("a");
        cache.insert(prepared(1, &a));
        assert!(cache.insert(prepared(2, &a)).is_none());
        assert_eq!(cache.get(&a), Some(StatementHandle(2)));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = StatementCache::new(0);
        assert_eq!(cache.capacity(), 1);
        let a = Command::new("a");
        cache.insert(prepared(9, &a));
        assert_eq!(cache.remove(a.id()).unwrap().handle(), StatementHandle(9));
        cache.insert(prepared(9, &a));
        assert_eq!(cache.clear().len(), 1);
        assert!(cache.is_empty());
    }
}
