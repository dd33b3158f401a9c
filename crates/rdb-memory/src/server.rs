//! In-memory servers and their procedures.
//!
//! A [`MemoryServer`] plays the backend: it holds committed data, a table
//! of procedures that commands name in their SQL text, and knobs for
//! injecting failures and latency. Sessions connected to the same server
//! share its data.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rdb_client::param::BoundParam;
use rdb_client::{
    Error, FromSql, IsolationLevel, ParamSlot, Result, Schema, SqlType, SqlValue,
};

use crate::store::{Committed, Writes};

/// Isolation levels a server accepts unless configured otherwise.
pub const DEFAULT_ISOLATION_LEVELS: [IsolationLevel; 6] = [
    IsolationLevel::Default,
    IsolationLevel::ReadUncommitted,
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
    IsolationLevel::Snapshot,
];

/// Body of a procedure.
pub type Handler = Arc<dyn Fn(&mut ProcContext<'_>) -> Result<()> + Send + Sync>;

/// A named procedure with a parameter signature.
#[derive(Clone)]
pub struct Procedure {
    name: String,
    params: Vec<ParamSlot>,
    handler: Handler,
}

impl Procedure {
    /// Create a procedure.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamSlot>,
        handler: impl Fn(&mut ProcContext<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            handler: Arc::new(handler),
        }
    }

    /// Get the procedure name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the parameter signature.
    #[must_use]
    pub fn params(&self) -> &[ParamSlot] {
        &self.params
    }

    pub(crate) fn call(&self, ctx: &mut ProcContext<'_>) -> Result<()> {
        (self.handler)(ctx)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// What a procedure sees while it runs.
pub struct ProcContext<'s> {
    params: Vec<BoundParam>,
    committed: &'s Committed,
    writes: Writes,
    isolation: IsolationLevel,
    sets: Vec<(Schema, Vec<Vec<SqlValue>>)>,
    outputs: Vec<(usize, SqlValue)>,
}

impl<'s> ProcContext<'s> {
    pub(crate) fn new(
        params: Vec<BoundParam>,
        committed: &'s Committed,
        writes: Writes,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            params,
            committed,
            writes,
            isolation,
            sets: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Get a bound parameter value by name. Unbound parameters are NULL.
    pub fn param(&self, name: &str) -> Result<&SqlValue> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| &p.value)
            .ok_or_else(|| Error::Bind(format!("procedure has no parameter '{name}'")))
    }

    /// Get a bound parameter value by position.
    pub fn param_at(&self, index: usize) -> Result<&SqlValue> {
        self.params
            .get(index)
            .map(|p| &p.value)
            .ok_or_else(|| Error::Bind(format!("procedure has no parameter #{index}")))
    }

    /// Get a bound parameter converted to `T`.
    pub fn get<T: FromSql>(&self, name: &str) -> Result<T> {
        Ok(T::from_sql(self.param(name)?)?)
    }

    /// Write the value of output parameter `name`.
    ///
    /// Values for parameters the caller did not mark as output are dropped.
    pub fn set_output(&mut self, name: &str, value: impl Into<SqlValue>) -> Result<()> {
        let slot = self
            .params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Bind(format!("procedure has no parameter '{name}'")))?;
        let value = value.into();
        match self.outputs.iter_mut().find(|(s, _)| *s == slot) {
            Some(existing) => existing.1 = value,
            None => self.outputs.push((slot, value)),
        }
        Ok(())
    }

    /// Append a result set.
    pub fn result_set(&mut self, schema: Schema, rows: Vec<Vec<SqlValue>>) {
        self.sets.push((schema, rows));
    }

    /// Isolation level the statement runs under.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Read a key as this session sees it.
    #[must_use]
    pub fn kv_get(&self, key: &str) -> Option<SqlValue> {
        self.writes.get(self.committed, key)
    }

    /// Write a key.
    pub fn kv_put(&mut self, key: impl Into<String>, value: SqlValue) {
        self.writes.put(key.into(), value);
    }

    /// Delete a key, reporting whether it existed.
    pub fn kv_delete(&mut self, key: &str) -> bool {
        self.writes.delete(self.committed, key)
    }

    /// Visible keys starting with `prefix`, in key order.
    #[must_use]
    pub fn kv_scan(&self, prefix: &str) -> Vec<(String, SqlValue)> {
        self.writes.scan(self.committed, prefix)
    }

    pub(crate) fn finish(self) -> (Writes, Vec<(Schema, Vec<Vec<SqlValue>>)>, Vec<(usize, SqlValue)>) {
        (self.writes, self.sets, self.outputs)
    }
}

/// A snapshot of server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Sessions ever established.
    pub connects: usize,
    /// Sessions currently open.
    pub open_sessions: usize,
    /// Statements prepared.
    pub prepares: usize,
    /// Statements executed.
    pub executions: usize,
    /// Session resets.
    pub resets: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) connects: AtomicUsize,
    pub(crate) open_sessions: AtomicUsize,
    pub(crate) prepares: AtomicUsize,
    pub(crate) executions: AtomicUsize,
    pub(crate) resets: AtomicUsize,
}

pub(crate) struct ServerInner {
    pub(crate) name: String,
    pub(crate) procedures: HashMap<String, Procedure>,
    pub(crate) isolation_levels: Vec<IsolationLevel>,
    pub(crate) committed: Mutex<Committed>,
    pub(crate) counters: Counters,
    pub(crate) fail_connects: AtomicBool,
    pub(crate) fail_pings: AtomicBool,
    pub(crate) connect_latency: Mutex<Duration>,
    pub(crate) row_latency: Duration,
    /// Bumped to invalidate every prepared handle.
    pub(crate) statement_epoch: AtomicU64,
}

/// An in-memory backend.
///
/// Clones share the same server.
#[derive(Clone)]
pub struct MemoryServer {
    pub(crate) inner: Arc<ServerInner>,
}

impl MemoryServer {
    /// Start building a server.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> MemoryServerBuilder {
        MemoryServerBuilder::new(name)
    }

    /// Get the server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Check if the server accepts an isolation level.
    #[must_use]
    pub fn supports(&self, level: IsolationLevel) -> bool {
        level == IsolationLevel::Default || self.inner.isolation_levels.contains(&level)
    }

    /// Get a counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let c = &self.inner.counters;
        ServerStats {
            connects: c.connects.load(Ordering::SeqCst),
            open_sessions: c.open_sessions.load(Ordering::SeqCst),
            prepares: c.prepares.load(Ordering::SeqCst),
            executions: c.executions.load(Ordering::SeqCst),
            resets: c.resets.load(Ordering::SeqCst),
        }
    }

    /// Read a committed key.
    #[must_use]
    pub fn committed(&self, key: &str) -> Option<SqlValue> {
        self.inner.committed.lock().get(key).cloned()
    }

    /// Number of committed keys.
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.inner.committed.lock().len()
    }

    /// Make new connections fail with `ConnectFailed`.
    pub fn set_fail_connects(&self, fail: bool) {
        self.inner.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Make pings fail.
    pub fn set_fail_pings(&self, fail: bool) {
        self.inner.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Delay every new connection by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.inner.connect_latency.lock() = latency;
    }

    /// Invalidate every prepared statement on every session.
    pub fn invalidate_statements(&self) {
        self.inner.statement_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn procedure(&self, sql: &str) -> Result<&Procedure> {
        let name = sql.trim();
        self.inner
            .procedures
            .get(name)
            .or_else(|| {
                self.inner
                    .procedures
                    .values()
                    .find(|p| p.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| Error::Backend(format!("unknown procedure: {name}")))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.statement_epoch.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryServer")
            .field("name", &self.inner.name)
            .field("procedures", &self.inner.procedures.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Builder for [`MemoryServer`].
pub struct MemoryServerBuilder {
    name: String,
    procedures: HashMap<String, Procedure>,
    isolation_levels: Vec<IsolationLevel>,
    connect_latency: Duration,
    row_latency: Duration,
    data: Committed,
}

impl MemoryServerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: HashMap::new(),
            isolation_levels: DEFAULT_ISOLATION_LEVELS.to_vec(),
            connect_latency: Duration::ZERO,
            row_latency: Duration::ZERO,
            data: Committed::new(),
        }
    }

    /// Register a procedure, replacing one with the same name.
    #[must_use]
    pub fn procedure(mut self, procedure: Procedure) -> Self {
        self.procedures.insert(procedure.name.clone(), procedure);
        self
    }

    /// Register the built-in key/value procedures.
    ///
    /// | Procedure | Parameters | Result |
    /// |-----------|------------|--------|
    /// | `put` | `key`, `value` | none |
    /// | `get` | `key` | one set `(key, value)` with zero or one row |
    /// | `delete` | `key`, output `deleted` | none |
    /// | `scan` | `prefix` | one set `(key, value)` in key order |
    #[must_use]
    pub fn with_kv_procedures(self) -> Self {
        let key = || ParamSlot::new("key").with_type(SqlType::Text);
        let kv_schema = || Schema::from_pairs([("key", SqlType::Text), ("value", SqlType::Unknown)]);

        self.procedure(Procedure::new(
            "put",
            vec![key(), ParamSlot::new("value")],
            |ctx| {
                let key: String = ctx.get("key")?;
                let value = ctx.param("value")?.clone();
                ctx.kv_put(key, value);
                Ok(())
            },
        ))
        .procedure(Procedure::new("get", vec![key()], move |ctx| {
            let key: String = ctx.get("key")?;
            let rows = ctx
                .kv_get(&key)
                .map(|value| vec![SqlValue::Text(key), value])
                .into_iter()
                .collect();
            ctx.result_set(kv_schema(), rows);
            Ok(())
        }))
        .procedure(Procedure::new(
            "delete",
            vec![key(), ParamSlot::new("deleted").with_type(SqlType::Bool)],
            |ctx| {
                let key: String = ctx.get("key")?;
                let existed = ctx.kv_delete(&key);
                ctx.set_output("deleted", existed)
            },
        ))
        .procedure(Procedure::new(
            "scan",
            vec![ParamSlot::new("prefix").with_type(SqlType::Text)],
            move |ctx| {
                let prefix: Option<String> = ctx.get("prefix")?;
                let rows = ctx
                    .kv_scan(prefix.as_deref().unwrap_or_default())
                    .into_iter()
                    .map(|(k, v)| vec![SqlValue::Text(k), v])
                    .collect();
                ctx.result_set(kv_schema(), rows);
                Ok(())
            },
        ))
    }

    /// Seed a committed key.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the accepted isolation levels. `Default` is always accepted.
    #[must_use]
    pub fn isolation_levels(mut self, levels: impl IntoIterator<Item = IsolationLevel>) -> Self {
        self.isolation_levels = levels.into_iter().collect();
        self
    }

    /// Delay every new connection.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Delay every row read.
    #[must_use]
    pub fn row_latency(mut self, latency: Duration) -> Self {
        self.row_latency = latency;
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> MemoryServer {
        MemoryServer {
            inner: Arc::new(ServerInner {
                name: self.name,
                procedures: self.procedures,
                isolation_levels: self.isolation_levels,
                committed: Mutex::new(self.data),
                counters: Counters::default(),
                fail_connects: AtomicBool::new(false),
                fail_pings: AtomicBool::new(false),
                connect_latency: Mutex::new(self.connect_latency),
                row_latency: self.row_latency,
                statement_epoch: AtomicU64::new(0),
            }),
        }
    }
}
