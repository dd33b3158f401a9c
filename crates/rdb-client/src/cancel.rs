//! Cancellation support.
//!
//! Every blocking operation takes a [`CancellationToken`]. Cancelling the
//! token makes the operation that observes it fail promptly; it does not
//! affect other operations sharing the pool.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rdb_client::cancel;
//! use std::time::Duration;
//!
//! // Give the whole query five seconds.
//! let token = cancel::timeout_token(Duration::from_secs(5));
//! let mut next = pool.query(&token, &report, vec![]).await?;
//! ```
//!
//! ## Important Notes
//!
//! - Tokens are cloneable and can be shared across tasks
//! - Cancelling is idempotent; multiple calls have no additional effect
//! - A cancelled lease wait fails with [`Error::PoolExhausted`]; every other
//!   operation fails with [`Error::Cancelled`]

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `fut` until it completes or `token` is cancelled.
///
/// An already-cancelled token wins without polling `fut`.
pub async fn run<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Fail with [`Error::Cancelled`] if `token` has been cancelled.
pub fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Create a token that cancels itself after `duration`.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn timeout_token(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = timer.cancelled() => {}
            () = tokio::time::sleep(duration) => {
                tracing::trace!(?duration, "cancellation deadline reached");
                timer.cancel();
            }
        }
    });
    token
}
