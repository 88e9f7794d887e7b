//! Cooperative cancellation for in-flight calls.
//!
//! A [`CancellationToken`] is a clonable signal. Exactly one combined signal
//! governs each call: the earliest of the client's internal timeout and a
//! caller-supplied token wins, aborting the transport call and any pending
//! retry sleep.

use tokio::sync::watch;

/// A signal that requests early termination of an in-flight operation.
///
/// Cloning is cheap; all clones observe the same signal. Once fired a token
/// stays fired.
///
/// # Examples
///
/// ```
/// use seawall::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Creates a new, unfired token.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Fires the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` if the token has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when the token fires; resolves immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a pre-fired token
        // resolves without awaiting a change.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaits cancellation of an optional token; pends forever when absent.
///
/// Lets `select!` arms treat "no caller token" uniformly.
pub(crate) async fn cancelled_opt(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
