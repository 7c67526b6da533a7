//! Single-resolution signal: settable exactly once, awaited by one waiter.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub struct ResolveOnce<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

pub struct Resolution<T> {
    receiver: oneshot::Receiver<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Resolved(T),
    TimedOut,
    /// The resolving side went away without a value.
    Abandoned,
}

pub fn resolve_once<T>() -> (ResolveOnce<T>, Resolution<T>) {
    let (tx, rx) = oneshot::channel();
    (
        ResolveOnce { sender: Mutex::new(Some(tx)) },
        Resolution { receiver: rx },
    )
}

impl<T> ResolveOnce<T> {
    /// Returns `false` if the signal was already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            // A dropped waiter still counts as resolved.
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl<T> Resolution<T> {
    pub async fn wait(self, timeout: Duration) -> WaitOutcome<T> {
        self.wait_until(Instant::now() + timeout).await
    }

    pub async fn wait_until(self, deadline: Instant) -> WaitOutcome<T> {
        match tokio::time::timeout_at(deadline, self.receiver).await {
            Ok(Ok(value)) => WaitOutcome::Resolved(value),
            Ok(Err(_)) => WaitOutcome::Abandoned,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
