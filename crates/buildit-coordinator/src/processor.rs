//! Queue processor that post-processes finished build tasks.

use crate::queue::{BuildTaskQueue, QueuedTask, TaskOutcome};
use buildit_core::workflow::BuildResultCallback;
use buildit_core::{State, TaskStatus};
use buildit_db::BuildRecordRepo;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumes the build task queue: persists the outcome, reports it to the
/// submitter's callback and completes the task.
pub struct QueueProcessor {
    id: String,
    queue: Arc<BuildTaskQueue>,
    records: Arc<dyn BuildRecordRepo>,
    result_callback: Option<Arc<dyn BuildResultCallback>>,
}

impl QueueProcessor {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<BuildTaskQueue>,
        records: Arc<dyn BuildRecordRepo>,
        result_callback: Option<Arc<dyn BuildResultCallback>>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            records,
            result_callback,
        }
    }

    /// Run the processor loop until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(processor_id = %self.id, "Starting queue processor");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                entry = self.queue.take() => match entry {
                    Some(entry) => self.process(entry).await,
                    None => {
                        warn!(processor_id = %self.id, "Build task queue closed");
                        break;
                    }
                },
            }
        }

        info!(processor_id = %self.id, "Queue processor stopped");
    }

    /// Post-process one queued task.
    pub async fn process(&self, entry: QueuedTask) {
        let QueuedTask { task, outcome } = entry;
        let build = task.identity();

        let status = match outcome {
            TaskOutcome::Finished(status) => status,
            TaskOutcome::Errored(err) => {
                let status = TaskStatus::new(task.status().operation, State::SystemError);
                warn!(build = %build, error = %err, status = %status, "Marking errored build");
                task.apply_error_status(status);
                status
            }
        };
        info!(processor_id = %self.id, build = %build, status = %status, "Processing finished build");

        let record = task.to_record();
        match self.records.save(record).await {
            Ok(saved) => debug!(build = %build, record_id = %saved.id, "Build record stored"),
            Err(e) => error!(build = %build, error = %e, "Failed to store build record"),
        }

        if let (Some(callback), Some(url)) = (
            self.result_callback.as_ref(),
            task.job_configuration().callback_url.as_deref(),
        ) {
            if let Err(e) = callback.notify_build_completed(url, &task.result()).await {
                warn!(build = %build, callback_url = %url, error = %e, "Build result callback failed");
            }
        }

        if let Err(e) = task.on_complete() {
            warn!(build = %build, error = %e, "Failed to complete build task");
        }
    }
}
