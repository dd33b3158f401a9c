//! Driver, session and result source for [`MemoryServer`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use rdb_client::{
    CancellationToken, Command, Driver, Error, Execution, IsolationLevel, Param, Result,
    ResultSource, Schema, Session, SqlValue, StatementHandle, cancel, param,
};

use crate::server::{MemoryServer, ProcContext};
use crate::store::{TxState, Writes};

/// A [`Driver`] connecting to one [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    server: MemoryServer,
}

impl MemoryDriver {
    /// Create a driver for `server`.
    #[must_use]
    pub fn new(server: MemoryServer) -> Self {
        Self { server }
    }

    /// Get the server.
    #[must_use]
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Session = MemorySession;

    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<MemorySession> {
        let latency = *self.server.inner.connect_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.server.inner.fail_connects.load(Ordering::SeqCst) {
            return Err(Error::ConnectFailed(format!(
                "server {} refused the connection",
                self.server.name()
            )));
        }

        let counters = &self.server.inner.counters;
        let id = counters.connects.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        counters.open_sessions.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(server = self.server.name(), session = id, "memory session opened");
        Ok(MemorySession {
            server: self.server.clone(),
            id,
            open: true,
            tx: None,
            prepared: HashMap::new(),
            next_handle: 1,
        })
    }
}

/// One session on a [`MemoryServer`].
///
/// Statements run in autocommit mode unless a transaction is open, in
/// which case their writes stay private to the session until commit.
#[derive(Debug)]
pub struct MemorySession {
    server: MemoryServer,
    id: u64,
    open: bool,
    tx: Option<TxState>,
    /// handle -> (procedure, epoch at prepare time)
    prepared: HashMap<u64, (String, u64)>,
    next_handle: u64,
}

impl MemorySession {
    /// Server-assigned session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check if a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Backend(format!("session {} is closed", self.id)))
        }
    }

    fn tx_mut(&mut self) -> Result<&mut TxState> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::Backend("no transaction is open".into()))
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn prepare(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
    ) -> Result<StatementHandle> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        let name = self.server.procedure(command.sql())?.name().to_string();
        let handle = self.next_handle;
        self.next_handle += 1;
        self.prepared.insert(handle, (name, self.server.epoch()));
        self.server
            .inner
            .counters
            .prepares
            .fetch_add(1, Ordering::SeqCst);
        Ok(StatementHandle(handle))
    }

    async fn unprepare(&mut self, handle: StatementHandle) -> Result<()> {
        self.prepared.remove(&handle.0);
        Ok(())
    }

    fn statement_valid(&self, handle: StatementHandle) -> bool {
        self.prepared
            .get(&handle.0)
            .is_some_and(|(_, epoch)| *epoch == self.server.epoch())
    }

    async fn execute(
        &mut self,
        cancel: &CancellationToken,
        command: &Command,
        handle: Option<StatementHandle>,
        params: Vec<Param>,
    ) -> Result<Execution> {
        cancel::check(cancel)?;
        self.ensure_open()?;

        let procedure = match handle {
            Some(handle) => {
                if !self.statement_valid(handle) {
                    return Err(Error::StaleStatement);
                }
                let (name, _) = &self.prepared[&handle.0];
                self.server.procedure(name)?.clone()
            }
            None => self.server.procedure(command.sql())?.clone(),
        };

        let requested = command.isolation();
        if !self.server.supports(requested) {
            return Err(Error::UnsupportedIsolation(requested));
        }
        let isolation = self.tx.as_ref().map_or(requested, |tx| tx.isolation);

        let bound =
            param::bind(cancel, procedure.params(), params, command.trunc_long_text()).await?;
        self.server
            .inner
            .counters
            .executions
            .fetch_add(1, Ordering::SeqCst);

        let (sets, outputs) = {
            let mut committed = self.server.inner.committed.lock();
            let base = self
                .tx
                .as_ref()
                .map_or_else(Writes::default, |tx| tx.writes.clone());
            let mut ctx = ProcContext::new(bound.values, &committed, base, isolation);
            procedure.call(&mut ctx)?;
            let (writes, sets, outputs) = ctx.finish();
            match self.tx.as_mut() {
                Some(tx) => tx.writes = writes,
                None => writes.apply(&mut committed),
            }
            (sets, outputs)
        };

        tracing::trace!(
            session = self.id,
            procedure = procedure.name(),
            sets = sets.len(),
            "statement executed"
        );
        let source = MemorySource::new(sets, outputs, self.server.inner.row_latency);
        Ok(Execution::new(Box::new(source)).with_outputs(bound.outputs))
    }

    async fn begin(
        &mut self,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
    ) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(Error::Backend("a transaction is already open".into()));
        }
        if !self.server.supports(isolation) {
            return Err(Error::UnsupportedIsolation(isolation));
        }
        self.tx = Some(TxState::new(isolation));
        Ok(())
    }

    async fn commit(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::Backend("no transaction is open".into()))?;
        tx.writes.apply(&mut self.server.inner.committed.lock());
        Ok(())
    }

    async fn rollback(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        if self.tx.take().is_none() {
            return Err(Error::Backend("no transaction is open".into()));
        }
        Ok(())
    }

    async fn save_point(&mut self, cancel: &CancellationToken, name: &str) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        self.tx_mut()?.save_point(name);
        Ok(())
    }

    async fn rollback_to(&mut self, cancel: &CancellationToken, name: &str) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        self.tx_mut()?.rollback_to(name)
    }

    async fn ping(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        if self.server.inner.fail_pings.load(Ordering::SeqCst) {
            return Err(Error::Backend(format!("session {} did not answer", self.id)));
        }
        Ok(())
    }

    async fn reset(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel::check(cancel)?;
        self.ensure_open()?;
        self.tx = None;
        self.prepared.clear();
        self.server.inner.counters.resets.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session = self.id, "memory session reset");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::take(&mut self.open) {
            self.tx = None;
            self.prepared.clear();
            self.server
                .inner
                .counters
                .open_sessions
                .fetch_sub(1, Ordering::SeqCst);
            tracing::trace!(session = self.id, "memory session closed");
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.open
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.open {
            self.server
                .inner
                .counters
                .open_sessions
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Result sets produced by one execution.
pub struct MemorySource {
    sets: VecDeque<(Schema, Vec<Vec<SqlValue>>)>,
    current: VecDeque<Vec<SqlValue>>,
    outputs: Vec<(usize, SqlValue)>,
    row_latency: Duration,
}

impl MemorySource {
    pub(crate) fn new(
        sets: Vec<(Schema, Vec<Vec<SqlValue>>)>,
        outputs: Vec<(usize, SqlValue)>,
        row_latency: Duration,
    ) -> Self {
        Self {
            sets: sets.into(),
            current: VecDeque::new(),
            outputs,
            row_latency,
        }
    }
}

#[async_trait]
impl ResultSource for MemorySource {
    async fn next_set(&mut self, cancel: &CancellationToken) -> Result<Option<Schema>> {
        cancel::check(cancel)?;
        self.current.clear();
        Ok(self.sets.pop_front().map(|(schema, rows)| {
            self.current = rows.into();
            schema
        }))
    }

    async fn next_row(&mut self, cancel: &CancellationToken) -> Result<Option<Vec<SqlValue>>> {
        if self.current.is_empty() {
            return Ok(None);
        }
        let latency = self.row_latency;
        if latency.is_zero() {
            cancel::check(cancel)?;
        } else {
            cancel::run(cancel, async move {
                tokio::time::sleep(latency).await;
                Ok(())
            })
            .await?;
        }
        Ok(self.current.pop_front())
    }

    async fn discard(&mut self, cancel: &CancellationToken) -> Result<()> {
        cancel::check(cancel)?;
        self.current.clear();
        Ok(())
    }

    fn take_outputs(&mut self) -> Vec<(usize, SqlValue)> {
        std::mem::take(&mut self.outputs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::server::Procedure;
    use rdb_client::{ParamSlot, SqlType};

    fn server() -> MemoryServer {
        MemoryServer::builder("session-tests")
            .with_kv_procedures()
            .procedure(Procedure::new("fail", vec![], |ctx| {
                ctx.kv_put("partial", SqlValue::Int(1));
                Err(Error::Backend("boom".into()))
            }))
            .procedure(Procedure::new(
                "echo",
                vec![ParamSlot::new("v").with_type(SqlType::Text)],
                |ctx| {
                    let v = ctx.param("v")?.clone();
                    ctx.result_set(Schema::from_pairs([("v", SqlType::Text)]), vec![vec![v]]);
                    Ok(())
                },
            ))
            .isolation_levels([IsolationLevel::ReadCommitted])
            .build()
    }

    async fn drain(mut execution: Execution, cancel: &CancellationToken) -> Vec<Vec<SqlValue>> {
        let mut rows = Vec::new();
        while execution.source.next_set(cancel).await.unwrap().is_some() {
            while let Some(row) = execution.source.next_row(cancel).await.unwrap() {
                rows.push(row);
            }
        }
        rows
    }

    #[tokio::test]
    async fn test_autocommit_and_transaction_visibility() {
        let server = server();
        let driver = MemoryDriver::new(server.clone());
        let cancel = CancellationToken::new();
        let mut a = driver.connect().await.unwrap();
        let mut b = driver.connect().await.unwrap();

        let put = Command::new("put");
        a.execute(&cancel, &put, None, vec![Param::new("k1"), Param::new(1)])
            .await
            .unwrap();
        assert_eq!(server.committed("k1"), Some(SqlValue::Int(1)));

        a.begin(&cancel, IsolationLevel::ReadCommitted).await.unwrap();
        a.execute(&cancel, &put, None, vec![Param::new("k2"), Param::new(2)])
            .await
            .unwrap();
        assert_eq!(server.committed("k2"), None);

        let get = Command::new("get");
        let seen_by_a = drain(
            a.execute(&cancel, &get, None, vec![Param::new("k2")]).await.unwrap(),
            &cancel,
        )
        .await;
        assert_eq!(seen_by_a.len(), 1);
        let seen_by_b = drain(
            b.execute(&cancel, &get, None, vec![Param::new("k2")]).await.unwrap(),
            &cancel,
        )
        .await;
        assert!(seen_by_b.is_empty());

        a.commit(&cancel).await.unwrap();
        assert_eq!(server.committed("k2"), Some(SqlValue::Int(2)));
        assert!(a.commit(&cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_statement_discards_writes() {
        let server = server();
        let mut session = MemoryDriver::new(server.clone()).connect().await.unwrap();
        let cancel = CancellationToken::new();
        let err = session
            .execute(&cancel, &Command::new("fail"), None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(server.committed("partial"), None);
    }

    #[tokio::test]
    async fn test_isolation_checks() {
        let server = server();
        let mut session = MemoryDriver::new(server).connect().await.unwrap();
        let cancel = CancellationToken::new();
        assert!(matches!(
            session.begin(&cancel, IsolationLevel::Snapshot).await,
            Err(Error::UnsupportedIsolation(IsolationLevel::Snapshot))
        ));
        let cmd = Command::new("echo").with_isolation(IsolationLevel::Serializable);
        assert!(matches!(
            session.execute(&cancel, &cmd, None, vec![]).await,
            Err(Error::UnsupportedIsolation(_))
        ));
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_prepared_handles_and_epoch() {
        let server = server();
        let mut session = MemoryDriver::new(server.clone()).connect().await.unwrap();
        let cancel = CancellationToken::new();
        let cmd = Command::new("echo");
        let handle = session.prepare(&cancel, &cmd).await.unwrap();
        assert!(session.statement_valid(handle));
        let rows = drain(
            session
                .execute(&cancel, &cmd, Some(handle), vec![Param::new("hi")])
                .await
                .unwrap(),
            &cancel,
        )
        .await;
        assert_eq!(rows, vec![vec![SqlValue::Text("hi".into())]]);

        server.invalidate_statements();
        assert!(!session.statement_valid(handle));
        assert!(matches!(
            session.execute(&cancel, &cmd, Some(handle), vec![]).await,
            Err(Error::StaleStatement)
        ));
        assert!(matches!(
            session.prepare(&cancel, &Command::new("nope")).await,
            Err(Error::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_close_and_drop_counters() {
        let server = server();
        let driver = MemoryDriver::new(server.clone());
        let mut a = driver.connect().await.unwrap();
        let b = driver.connect().await.unwrap();
        assert_eq!(server.stats().open_sessions, 2);

        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(!a.is_valid());
        drop(b);
        assert_eq!(server.stats().open_sessions, 0);
        assert_eq!(server.stats().connects, 2);

        server.set_fail_connects(true);
        assert!(matches!(driver.connect().await, Err(Error::ConnectFailed(_))));
    }
}
