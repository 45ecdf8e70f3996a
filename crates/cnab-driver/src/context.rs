//! Cancellation and deadlines for driver runs.
//!
//! A [`Context`] is cheap to clone and is threaded through every await point
//! inside a driver. Cancellation is signalled through a [`CancelHandle`]; a
//! deadline expiring is reported the same way, so a driver never needs to
//! tell the two apart.

use std::time::Duration;

use cnab_core::CnabError;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cause reported when a context is cancelled explicitly.
pub const CANCELED: &str = "context canceled";
/// Cause reported when a context's deadline passes.
pub const DEADLINE_EXCEEDED: &str = "context deadline exceeded";

#[derive(Clone, Debug, Default)]
pub struct Context {
    signal: Option<watch::Receiver<Option<String>>>,
    deadline: Option<Instant>,
}

/// Cancels the [`Context`] it was created with, and every clone of it.
///
/// Dropping the handle does not cancel the context.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<String>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cause| {
            if cause.is_some() {
                return false;
            }
            *cause = Some(CANCELED.to_string());
            true
        });
    }
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(None);
        let ctx = Self {
            signal: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle { tx })
    }

    /// A cancellable context that also expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> (Self, CancelHandle) {
        let (mut ctx, handle) = Self::with_cancel();
        ctx.deadline = Some(Instant::now() + timeout);
        (ctx, handle)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation error if the context is already done.
    pub fn err(&self) -> Option<CnabError> {
        if let Some(rx) = &self.signal {
            let cause = rx.borrow().clone();
            if let Some(cause) = cause {
                return Some(CnabError::Cancelled(cause));
            }
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => {
                Some(CnabError::Cancelled(DEADLINE_EXCEEDED.to_string()))
            }
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> cnab_core::Result<()> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn cancelled(&self) -> CnabError {
        let signal = async {
            let Some(rx) = &self.signal else {
                return std::future::pending::<String>().await;
            };
            let mut rx = rx.clone();
            loop {
                let cause = rx.borrow_and_update().clone();
                if let Some(cause) = cause {
                    return cause;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling.
                    return std::future::pending::<String>().await;
                }
            }
        };
        let expired = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cause = signal => CnabError::Cancelled(cause),
            _ = expired => CnabError::Cancelled(DEADLINE_EXCEEDED.to_string()),
        }
    }
}
