//! The single-slot stage hand-off.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use swarm_core::Stage;

/// Holds the latest pushed [`Stage`].
///
/// One slot, latest wins: a push overwrites whatever has not been read yet.
/// Readers clone the whole value out of the slot, so they see either the old
/// stage or the new one, never a mix of both.
#[derive(Clone)]
pub struct StageBoard {
    tx: Arc<watch::Sender<Option<Stage>>>,
}

impl Default for StageBoard {
    fn default() -> Self {
        Self::empty()
    }
}

impl StageBoard {
    /// A board with nothing pushed yet; watchers stay idle until a push.
    pub fn empty() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn new(initial: Stage) -> Self {
        let (tx, _rx) = watch::channel(Some(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the slot. Returns the stage that was there before.
    pub fn push(&self, stage: Stage) -> Option<Stage> {
        info!(
            checkpoint = %stage.checkpoint,
            cluster = stage.cluster.len(),
            "stage pushed"
        );
        self.tx.send_replace(Some(stage))
    }

    pub fn current(&self) -> Option<Stage> {
        self.tx.borrow().clone()
    }

    pub fn checkpoint(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.checkpoint.clone())
    }

    /// Change notifications for in-process consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<Stage>> {
        self.tx.subscribe()
    }
}
