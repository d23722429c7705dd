use std::time::Duration;

use tokio::sync::watch;

use crate::error::ApiError;

/// Run-wide stop flag, raised on the first fatal error.
///
/// - `cancel()` records the first reason and wakes sleepers.
/// - Long sleeps select on either the timer or cancellation.
#[derive(Clone, Debug)]
pub struct CancellationState {
    tx: watch::Sender<Option<String>>,
}

impl Default for CancellationState {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    pub(crate) fn cancelled_error(&self) -> ApiError {
        ApiError::Cancelled(self.reason().unwrap_or_else(|| "run aborted".to_string()))
    }

    /// Sleep for `duration`, returning early with an error on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ApiError> {
        let mut rx = self.subscribe();
        if rx.borrow().is_some() {
            return Err(self.cancelled_error());
        }

        let sleeper = tokio::time::sleep(duration);
        tokio::pin!(sleeper);
        tokio::select! {
            _ = &mut sleeper => Ok(()),
            _ = async {
                loop {
                    if rx.changed().await.is_err() {
                        // sender dropped, nothing can cancel us anymore
                        std::future::pending::<()>().await;
                    }
                    if rx.borrow().is_some() {
                        break;
                    }
                }
            } => Err(self.cancelled_error()),
        }
    }
}
