//! Per-session bookkeeping.
//!
//! Each physical session owned by the pool carries a [`SessionMeta`]
//! recording its pool-local id, when it was opened, when it last changed
//! hands, how often it was leased and which [`SessionState`] it is in.

use std::time::Duration;

use tokio::time::Instant;

/// Where a pooled session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parked in the idle list.
    Idle,
    /// Held by a connection, transaction or open cursor.
    Leased,
    /// Closed, or on its way there.
    Closed,
}

impl SessionState {
    /// Whether a session in this state may be handed out.
    #[must_use]
    pub fn is_leasable(self) -> bool {
        self == Self::Idle
    }

    /// Whether the pool has let go of the session for good.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

/// Bookkeeping for one pooled session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// Pool-local session id, assigned in connect order.
    pub id: u64,
    /// Instant the driver session was opened.
    pub opened_at: Instant,
    /// Instant of the last lease or return.
    pub touched_at: Instant,
    /// Lease count over the session's life.
    pub leases: u64,
    /// Current state.
    pub state: SessionState,
}

impl SessionMeta {
    /// Fresh bookkeeping for a session that was just opened and is idle.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let opened_at = Instant::now();
        Self {
            id,
            opened_at,
            touched_at: opened_at,
            leases: 0,
            state: SessionState::Idle,
        }
    }

    /// Time since the driver session was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// True when the session sat idle for longer than `idle_timeout`.
    /// A zero timeout disables expiry.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        if idle_timeout.is_zero() || !self.state.is_leasable() {
            return false;
        }
        self.touched_at.elapsed() > idle_timeout
    }

    /// Record a lease.
    pub fn mark_leased(&mut self) {
        self.leases += 1;
        self.touched_at = Instant::now();
        self.state = SessionState::Leased;
    }

    /// Record a return to the idle list.
    pub fn mark_returned(&mut self) {
        self.touched_at = Instant::now();
        self.state = SessionState::Idle;
    }

    /// Record that the session is being closed.
    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }
}
