//! Build task queue: terminal and errored tasks waiting for post-processing.

use buildit_core::TaskStatus;
use buildit_core::driver::DriverError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::error;

use crate::task::BuildTask;

/// Why a task was queued.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The task reached a terminal status.
    Finished(TaskStatus),
    /// The driver failed; the consumer picks the final status.
    Errored(DriverError),
}

#[derive(Debug)]
pub struct QueuedTask {
    pub task: Arc<BuildTask>,
    pub outcome: TaskOutcome,
}

/// Unbounded FIFO shared by producers (tasks) and consumers (queue processors).
///
/// Adding never blocks and never runs post-processing inline.
pub struct BuildTaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    len: AtomicUsize,
}

impl BuildTaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, entry: QueuedTask) {
        let build = entry.task.identity();
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(entry).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            error!(build = %build, "Build task queue is closed, dropping task");
        }
    }

    /// Wait for the next entry. Cancel-safe.
    pub async fn take(&self) -> Option<QueuedTask> {
        let entry = self.rx.lock().await.recv().await;
        if entry.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        entry
    }

    /// Take the next entry if one is ready and no consumer holds the receiver.
    pub fn try_take(&self) -> Option<QueuedTask> {
        let entry = self.rx.try_lock().ok()?.try_recv().ok();
        if entry.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BuildTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
