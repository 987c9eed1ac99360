//! Cancellation tokens with optional deadlines.
//!
//! A [`RunContext`] is cheap to clone and is threaded through every
//! blocking wait. It fires when its cancel signal flips to `true` or when
//! its deadline passes, whichever comes first. Child contexts inherit both
//! and can only tighten them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::RunError;

/// Why a context fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    Signalled,
    DeadlineExceeded,
}

impl From<Cancelled> for RunError {
    fn from(_: Cancelled) -> Self {
        RunError::CancellationExceeded
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    signal: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with, and all of its children.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl RunContext {
    /// A context that never fires on its own.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            signal: rx,
            deadline: None,
        }
    }

    /// A fresh root context and the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                signal: rx,
                deadline: None,
            },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    /// Wrap a daemon-style shutdown channel (`true` = shut down).
    pub fn from_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            signal: shutdown,
            deadline: None,
        }
    }

    /// A child that fires when this context fires or when the returned
    /// handle is used. Must be called inside a tokio runtime.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(*self.signal.borrow());
        let tx = Arc::new(tx);

        let parent = Self {
            signal: self.signal.clone(),
            deadline: None,
        };
        let forward = Arc::clone(&tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.done() => {
                    forward.send_replace(true);
                }
                _ = forward.closed() => {}
            }
        });

        (
            Self {
                signal: rx,
                deadline: self.deadline,
            },
            CancelHandle { tx },
        )
    }

    /// A child whose deadline is at most `timeout` from now. A timeout too
    /// large to represent leaves the current deadline, if any, in place.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(at) => self.with_deadline(at),
            None => self.clone(),
        }
    }

    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < at => existing,
            _ => at,
        };
        Self {
            signal: self.signal.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    pub fn check(&self) -> Option<Cancelled> {
        if *self.signal.borrow() {
            return Some(Cancelled::Signalled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(Cancelled::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.check().is_some()
    }

    /// Resolves once the context fires.
    pub async fn done(&self) -> Cancelled {
        let mut rx = self.signal.clone();
        let signalled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender gone without cancelling: this signal can no longer fire.
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(at) => tokio::select! {
                _ = signalled => Cancelled::Signalled,
                _ = tokio::time::sleep_until(at) => Cancelled::DeadlineExceeded,
            },
            None => {
                signalled.await;
                Cancelled::Signalled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_fires() {
        let ctx = RunContext::background();
        assert!(!ctx.is_done());
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn cancel_handle_fires_context() {
        let (ctx, handle) = RunContext::new();
        assert_eq!(ctx.check(), None);
        handle.cancel();
        assert_eq!(ctx.check(), Some(Cancelled::Signalled));
        assert_eq!(ctx.done().await, Cancelled::Signalled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires() {
        let ctx = RunContext::background().with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_done());
        assert_eq!(ctx.done().await, Cancelled::DeadlineExceeded);
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_only_tightens() {
        let parent = RunContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn unrepresentable_timeout_keeps_parent_deadline() {
        let unbounded = RunContext::background().with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(unbounded.deadline(), None);
        assert!(!unbounded.is_done());

        let parent = RunContext::background().with_timeout(Duration::from_secs(5));
        let child = parent.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let (root, handle) = RunContext::new();
        let (child, _child_handle) = root.with_cancel();
        handle.cancel();
        let fired = tokio::time::timeout(Duration::from_secs(1), child.done()).await;
        assert_eq!(fired, Ok(Cancelled::Signalled));
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent_alone() {
        let (root, _handle) = RunContext::new();
        let (child, child_handle) = root.with_cancel();
        child_handle.cancel();
        assert!(child.is_done());
        assert!(!root.is_done());
    }

    #[tokio::test]
    async fn shutdown_channel_drives_context() {
        let (tx, rx) = watch::channel(false);
        let ctx = RunContext::from_shutdown(rx);
        assert!(!ctx.is_done());
        tx.send(true).unwrap();
        assert_eq!(ctx.done().await, Cancelled::Signalled);
    }
}
