//! Boot synchronizer: one-shot completion signal for asynchronous work.
//!
//! A listener bind or an outbound connect runs on a background task. The task
//! reports its outcome exactly once with [`BootSync::succeed`] or
//! [`BootSync::fail`]; any number of waiters observe that outcome through
//! [`BootSync::wait`]. A waiter that arrives after completion returns
//! immediately, so a signal can never be missed.
//!
//! There is no built-in deadline. Callers that need one wrap the wait in
//! `tokio::time::timeout`; dropping the wait future abandons it.

use peerlink_types::WireError;
use std::sync::Arc;
use tokio::sync::watch;

/// Observable state of a [`BootSync`].
#[derive(Debug, Clone)]
pub enum BootState {
    /// No outcome reported yet.
    Pending,
    /// The operation completed.
    Succeeded,
    /// The operation failed with the captured cause.
    Failed(Arc<WireError>),
}

impl BootState {
    /// True until an outcome has been reported.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    fn into_result(self) -> Result<(), Arc<WireError>> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed(cause) => Err(cause),
            Self::Pending => Err(Arc::new(WireError::Protocol(
                "boot signal resolved without an outcome".to_string(),
            ))),
        }
    }
}

/// One-shot, multi-waiter completion signal. Clones share the same state.
#[derive(Debug, Clone)]
pub struct BootSync {
    state: Arc<watch::Sender<BootState>>,
}

impl BootSync {
    /// New signal in the [`BootState::Pending`] state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BootState::Pending);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Report success. Returns `false` if an outcome was already reported.
    pub fn succeed(&self) -> bool {
        self.complete(BootState::Succeeded)
    }

    /// Report failure. Returns `false` if an outcome was already reported.
    pub fn fail(&self, cause: WireError) -> bool {
        self.complete(BootState::Failed(Arc::new(cause)))
    }

    fn complete(&self, terminal: BootState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = terminal;
                true
            } else {
                false
            }
        })
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> BootState {
        self.state.borrow().clone()
    }

    /// True once either outcome has been reported.
    pub fn is_done(&self) -> bool {
        !self.state.borrow().is_pending()
    }

    /// Wait until an outcome is reported and return it.
    pub async fn wait(&self) -> Result<(), Arc<WireError>> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => (*state).clone(),
            Err(_) => BootState::Pending,
        };
        state.into_result()
    }

    /// Block the current thread until an outcome is reported.
    ///
    /// For synchronous callers only; must not be called from inside an async
    /// runtime worker.
    pub fn wait_blocking(&self) -> Result<(), Arc<WireError>> {
        futures::executor::block_on(self.wait())
    }
}

impl Default for BootSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn refused() -> WireError {
        WireError::Connect {
            addr: "127.0.0.1:1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
    }

    #[tokio::test]
    async fn test_wait_after_failure_returns_immediately() {
        let boot = BootSync::new();
        assert!(boot.fail(refused()));

        let outcome = tokio::time::timeout(Duration::from_millis(100), boot.wait())
            .await
            .expect("already-resolved signal must not block");
        let cause = outcome.unwrap_err();
        assert!(matches!(*cause, WireError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_outcome_is_set_exactly_once() {
        let boot = BootSync::new();
        assert!(boot.state().is_pending());
        assert!(boot.succeed());
        assert!(!boot.fail(refused()));
        assert!(!boot.succeed());
        assert!(matches!(boot.state(), BootState::Succeeded));
        assert!(boot.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_many_waiters_observe_same_failure() {
        let boot = BootSync::new();
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let boot = boot.clone();
            waiters.push(tokio::spawn(async move { boot.wait().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!boot.is_done());

        boot.fail(refused());
        let mut causes = Vec::new();
        for waiter in waiters {
            causes.push(waiter.await.unwrap().unwrap_err());
        }
        assert!(causes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_wait_blocking_from_plain_thread() {
        let boot = BootSync::new();
        let signaller = boot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaller.succeed();
        });
        assert!(boot.wait_blocking().is_ok());
        handle.join().unwrap();
    }
}
