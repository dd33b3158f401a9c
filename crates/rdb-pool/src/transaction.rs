//! Pooled transactions.

use async_trait::async_trait;
use rdb_client::cancel;
use rdb_client::transaction::validate_savepoint_name;
use rdb_client::{
    CancellationToken, Command, Driver, Error, IsolationLevel, Next, Param, Queryer, Result,
    Savepoints, Session, Transaction, TransactionState,
};

use crate::session::{DirtyGuard, Lease, PooledSession};

/// A transaction on a leased connection.
///
/// The connection goes back to the pool as soon as the transaction is
/// committed or rolled back, even if the value is kept around. Dropping a
/// transaction that is still open marks its session for reset, which rolls
/// the transaction back before the session is reused.
pub struct PooledTransaction<D: Driver> {
    lease: Option<Lease<D>>,
    id: u64,
    isolation: IsolationLevel,
    state: TransactionState,
    savepoints: Savepoints,
}

impl<D: Driver> PooledTransaction<D> {
    pub(crate) async fn begin(
        mut lease: Lease<D>,
        cancel: &CancellationToken,
        isolation: IsolationLevel,
    ) -> Result<Self> {
        let entry = lease.session()?;
        if let Err(e) = cancel::run(cancel, entry.session.begin(cancel, isolation)).await {
            if matches!(e, Error::Cancelled) {
                entry.dirty = true;
            }
            return Err(e);
        }
        let id = entry.meta.id;
        tracing::debug!(connection = id, isolation = %isolation, "transaction started");
        Ok(Self {
            lease: Some(lease),
            id,
            isolation,
            state: TransactionState::Open,
            savepoints: Savepoints::new(),
        })
    }

    /// Names of the savepoints currently defined, oldest first.
    #[must_use]
    pub fn savepoints(&self) -> &[String] {
        self.savepoints.names()
    }

    /// Pool-local identifier of the session the transaction runs on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.id
    }

    /// Check if the connection has gone back to its pool.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lease.is_none()
    }

    /// The session of an open transaction.
    fn open_session(&mut self) -> Result<&mut PooledSession<D::Session>> {
        if self.state.is_terminal() {
            return Err(Error::TransactionClosed);
        }
        self.lease
            .as_mut()
            .ok_or(Error::TransactionClosed)?
            .session()
    }

    async fn finish(&mut self, cancel: &CancellationToken, commit: bool) -> Result<()> {
        let entry = self.open_session()?;
        let result = if commit {
            cancel::run(cancel, entry.session.commit(cancel)).await
        } else {
            cancel::run(cancel, entry.session.rollback(cancel)).await
        };
        if let Err(e) = &result {
            tracing::warn!(connection = entry.meta.id, commit, error = %e, "transaction end failed");
            entry.dirty = true;
        }

        self.state = match (&result, commit) {
            (Ok(()), true) => TransactionState::Committed,
            _ => TransactionState::RolledBack,
        };
        self.savepoints.clear();
        // the session goes back now; a failed end left it marked dirty
        self.lease = None;
        tracing::debug!(connection = self.id, state = ?self.state, "transaction finished");
        result
    }
}

#[async_trait]
impl<D: Driver> Queryer for PooledTransaction<D> {
    async fn query<'a>(
        &'a mut self,
        cancel: &CancellationToken,
        command: &Command,
        params: Vec<Param>,
    ) -> Result<Next<'a>> {
        let entry = self.open_session()?;
        let execution = entry.execute(cancel, command, params).await?;
        Ok(Next::new(execution, command.trunc_long_text()).with_guard(DirtyGuard(&mut entry.dirty)))
    }
}

#[async_trait]
impl<D: Driver> Transaction for PooledTransaction<D> {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    async fn save_point(&mut self, cancel: &CancellationToken, name: &str) -> Result<()> {
        self.open_session()?;
        validate_savepoint_name(name)?;
        let entry = self.open_session()?;
        cancel::run(cancel, entry.session.save_point(cancel, name)).await?;
        self.savepoints.create(name)?;
        tracing::debug!(connection = self.id, savepoint = name, "savepoint created");
        Ok(())
    }

    async fn rollback_to(&mut self, cancel: &CancellationToken, name: &str) -> Result<()> {
        self.open_session()?;
        self.savepoints.check(name)?;
        let entry = self.open_session()?;
        cancel::run(cancel, entry.session.rollback_to(cancel, name)).await?;
        self.savepoints.rolled_back_to(name)?;
        tracing::debug!(connection = self.id, savepoint = name, "rolled back to savepoint");
        Ok(())
    }

    async fn commit(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.finish(cancel, true).await
    }

    async fn rollback(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.finish(cancel, false).await
    }
}

impl<D: Driver> Drop for PooledTransaction<D> {
    fn drop(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        if let Some(lease) = self.lease.as_mut() {
            tracing::warn!(
                connection = self.id,
                isolation = %self.isolation,
                "transaction dropped while open; it will be rolled back"
            );
            lease.mark_dirty();
        }
    }
}

impl<D: Driver> std::fmt::Debug for PooledTransaction<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledTransaction")
            .field("connection", &self.id)
            .field("released", &self.is_released())
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .field("savepoints", &self.savepoints.names())
            .finish()
    }
}
