//! Lifecycle signals.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot, multi-waiter completion flag.
///
/// Firing is idempotent: the first call wins and later calls are no-ops.
/// Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
        }
    }

    /// Fire the signal. Returns true only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
        signal.wait().await;
    }

    #[tokio::test]
    async fn test_wakes_waiters() {
        let signal = Signal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.fire();
        waiter.await.unwrap();
    }
}
