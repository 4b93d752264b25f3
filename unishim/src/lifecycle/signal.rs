//! Single-fire notification primitives.
//!
//! Every entity carries three of these: the exit signal (carries a code),
//! and two latches (`exit_io`, `stdin_closer`) that only transition from
//! open to closed. Both are built on `tokio::sync::watch` so any number of
//! waiters can observe the transition, including ones that subscribe after
//! it happened.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use unishim_shared::errors::{ShimError, ShimResult};

/// A payload-free signal that is closed exactly once.
#[derive(Debug)]
pub struct Latch {
    name: &'static str,
    tx: watch::Sender<bool>,
    reclosed: AtomicBool,
}

impl Latch {
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name,
            tx,
            reclosed: AtomicBool::new(false),
        }
    }

    /// Close the latch.
    ///
    /// Returns `true` for the call that performed the transition. A second
    /// close is an invariant violation: it is logged and reported as `false`
    /// so callers and tests can flag it.
    pub fn close(&self) -> bool {
        let closed_now = self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });

        if !closed_now {
            self.reclosed.store(true, Ordering::Relaxed);
            tracing::error!(latch = self.name, "latch closed more than once");
        }
        closed_now
    }

    /// Whether `close` was ever called on an already closed latch.
    pub fn closed_more_than_once(&self) -> bool {
        self.reclosed.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is closed. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel outlives this borrow.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A single-slot exit notification carrying the terminal exit code.
#[derive(Debug)]
pub struct ExitSignal {
    tx: watch::Sender<Option<u32>>,
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Deliver the exit code.
    ///
    /// # Errors
    ///
    /// `ShimError::InvalidState` if a code was already delivered; the first
    /// code is kept.
    pub fn fire(&self, code: u32) -> ShimResult<()> {
        let mut previous = None;
        let fired = self.tx.send_if_modified(|slot| match slot {
            Some(existing) => {
                previous = Some(*existing);
                false
            }
            None => {
                *slot = Some(code);
                true
            }
        });

        if fired {
            Ok(())
        } else {
            Err(ShimError::InvalidState(format!(
                "exit signal already fired with {}, refusing {}",
                previous.unwrap_or_default(),
                code
            )))
        }
    }

    /// The delivered code, if any.
    pub fn code(&self) -> Option<u32> {
        *self.tx.borrow()
    }

    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait for the exit code.
    pub async fn wait(&self) -> ShimResult<u32> {
        let mut rx = self.tx.subscribe();
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ShimError::Internal("exit signal dropped".to_string()))?;
        (*value).ok_or_else(|| ShimError::Internal("exit signal woke without a code".to_string()))
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn latch_closes_once() {
        let latch = Latch::new("exit_io");
        assert!(!latch.is_closed());
        assert!(latch.close());
        assert!(latch.is_closed());
        assert!(!latch.closed_more_than_once());
        assert!(!latch.close(), "second close must be flagged");
        assert!(latch.closed_more_than_once());
    }

    #[tokio::test]
    async fn latch_wait_returns_after_close() {
        let latch = Arc::new(Latch::new("stdin_closer"));
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        latch.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn latch_wait_on_closed_latch_is_immediate() {
        let latch = Latch::new("exit_io");
        latch.close();
        tokio::time::timeout(Duration::from_millis(100), latch.wait())
            .await
            .expect("already closed latch must not block");
    }

    #[test]
    fn exit_signal_keeps_first_code() {
        let exit = ExitSignal::new();
        assert_eq!(exit.code(), None);
        exit.fire(3).unwrap();

        let err = exit.fire(255).unwrap_err();
        assert!(matches!(err, ShimError::InvalidState(_)));
        assert_eq!(exit.code(), Some(3));
    }

    #[tokio::test]
    async fn exit_signal_wakes_late_and_early_waiters() {
        let exit = Arc::new(ExitSignal::new());
        let early = {
            let exit = exit.clone();
            tokio::spawn(async move { exit.wait().await })
        };

        exit.fire(0).unwrap();

        assert_eq!(early.await.unwrap().unwrap(), 0);
        assert_eq!(exit.wait().await.unwrap(), 0);
    }
}
