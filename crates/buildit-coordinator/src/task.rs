//! Build task - one build's lifecycle record.

use buildit_core::build::{
    BuildJobConfiguration, BuildJobDetails, BuildRecord, BuildResult, RepositoryConfiguration,
};
use buildit_core::driver::DriverError;
use buildit_core::{BuildIdentity, Error, ResourceId, Result, TaskStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};

use crate::queue::{BuildTaskQueue, QueuedTask, TaskOutcome};
use crate::running::RunningTaskSet;

/// Collaborators a task reports to.
#[derive(Clone)]
pub struct TaskContext {
    pub running: Arc<RunningTaskSet>,
    pub queue: Arc<BuildTaskQueue>,
}

struct TaskState {
    status: TaskStatus,
    last_status_update_at: DateTime<Utc>,
    repository: Option<RepositoryConfiguration>,
    details: Option<BuildJobDetails>,
    last_error: Option<DriverError>,
    /// Set once the task went into the queue for a terminal transition or an error.
    enqueued: bool,
    /// Taken exactly once by `on_complete`.
    completion: Option<oneshot::Sender<BuildResult>>,
}

/// The coordinator's handle on one in-flight build.
///
/// Status updates come from the single driver task that owns the build;
/// completion may race with anything, so it is guarded by taking the
/// completion sender.
pub struct BuildTask {
    identity: BuildIdentity,
    job: BuildJobConfiguration,
    context: TaskContext,
    state: Mutex<TaskState>,
    status_tx: watch::Sender<TaskStatus>,
    /// Every accepted update in order, for consumers that must not miss one.
    events_tx: mpsc::UnboundedSender<TaskStatus>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskStatus>>>,
}

impl BuildTask {
    /// Create a task and the receiver its final result will be sent on.
    pub fn new(
        job: BuildJobConfiguration,
        context: TaskContext,
    ) -> (Arc<Self>, oneshot::Receiver<BuildResult>) {
        let (completion_tx, completion_rx) = oneshot::channel();
        let status = TaskStatus::initial();
        let (status_tx, _) = watch::channel(status);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = Arc::new(Self {
            identity: job.identity(),
            job,
            context,
            state: Mutex::new(TaskState {
                status,
                last_status_update_at: Utc::now(),
                repository: None,
                details: None,
                last_error: None,
                enqueued: false,
                completion: Some(completion_tx),
            }),
            status_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        });
        (task, completion_rx)
    }

    pub fn identity(&self) -> BuildIdentity {
        self.identity
    }

    pub fn job_configuration(&self) -> &BuildJobConfiguration {
        &self.job
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn last_status_update_at(&self) -> DateTime<Utc> {
        self.state.lock().last_status_update_at
    }

    pub fn repository_configuration(&self) -> Option<RepositoryConfiguration> {
        self.state.lock().repository.clone()
    }

    pub fn set_repository_configuration(&self, repository: RepositoryConfiguration) {
        self.state.lock().repository = Some(repository);
    }

    pub fn job_details(&self) -> Option<BuildJobDetails> {
        self.state.lock().details.clone()
    }

    /// Set before the terminal status so post-processing sees the details.
    pub fn set_job_details(&self, details: BuildJobDetails) {
        self.state.lock().details = Some(details);
    }

    pub fn last_error(&self) -> Option<DriverError> {
        self.state.lock().last_error.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completion.is_none()
    }

    /// Observe status changes. The latest status always replaces the previous one.
    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.status_tx.subscribe()
    }

    /// Take the stream of every status update, in the order applied.
    ///
    /// Updates made before the call are buffered. Only one consumer can
    /// take it; later calls return `None`.
    pub fn take_status_events(&self) -> Option<mpsc::UnboundedReceiver<TaskStatus>> {
        self.events_rx.lock().take()
    }

    fn publish(&self, status: TaskStatus) {
        self.status_tx.send_replace(status);
        // The receiver is gone once its consumer saw a terminal status.
        let _ = self.events_tx.send(status);
    }

    /// Record a new status and publish it.
    ///
    /// Entering a terminal state puts the task into the build task queue,
    /// unless it is already there. Moving backwards or out of a terminal state
    /// is rejected and leaves the task untouched.
    pub fn update_status(self: &Arc<Self>, status: TaskStatus) -> Result<()> {
        let enqueue = {
            let mut state = self.state.lock();
            let current = state.status;
            if !current.state.can_transition_to(status.state) {
                error!(
                    build = %self.identity,
                    from = %current,
                    to = %status,
                    "Rejected invalid status transition"
                );
                return Err(Error::InvalidTransition {
                    identity: self.identity,
                    from: current.state,
                    to: status.state,
                });
            }

            trace!(build = %self.identity, from = %current, to = %status, "Updating task status");
            state.status = status;
            state.last_status_update_at = Utc::now();
            self.publish(status);

            let enqueue = status.is_terminal() && !state.enqueued;
            if enqueue {
                state.enqueued = true;
            }
            enqueue
        };

        if enqueue {
            self.context.queue.add(QueuedTask {
                task: self.clone(),
                outcome: TaskOutcome::Finished(status),
            });
        }
        Ok(())
    }

    /// Record a driver failure and hand the task to the error path.
    ///
    /// The status is left alone; the queue consumer decides what the failure
    /// means for the lifecycle.
    pub fn on_error(self: &Arc<Self>, err: DriverError) {
        let enqueue = {
            let mut state = self.state.lock();
            state.last_error = Some(err.clone());
            let enqueue = !state.enqueued;
            state.enqueued = true;
            enqueue
        };

        if enqueue {
            warn!(build = %self.identity, error = %err, "Build failed in driver");
            self.context.queue.add(QueuedTask {
                task: self.clone(),
                outcome: TaskOutcome::Errored(err),
            });
        } else {
            error!(
                build = %self.identity,
                error = %err,
                "Driver error after the task was already queued, recorded only"
            );
        }
    }

    /// Apply the terminal status chosen by the error path without queueing again.
    pub(crate) fn apply_error_status(&self, status: TaskStatus) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            debug!(build = %self.identity, status = %state.status, "Task already terminal");
            return;
        }
        state.status = status;
        state.last_status_update_at = Utc::now();
        self.publish(status);
    }

    /// Finish the task: free its identity in the running set and send the
    /// final result to whoever waits on it.
    ///
    /// Only the first call has any effect.
    pub fn on_complete(&self) -> Result<()> {
        let (completion, result) = {
            let mut state = self.state.lock();
            let Some(completion) = state.completion.take() else {
                error!(build = %self.identity, "Build task completed twice");
                return Err(Error::AlreadyCompleted(self.identity));
            };
            if !state.status.is_terminal() {
                warn!(build = %self.identity, status = %state.status, "Completing a non-terminal task");
            }
            (completion, self.result_locked(&state))
        };

        // Free the identity first so a waiter can resubmit as soon as it has the result.
        if !self.context.running.remove(self) {
            warn!(build = %self.identity, "Completed task was not in the running set");
        }
        if completion.send(result).is_err() {
            debug!(build = %self.identity, "Nobody is waiting for the build result");
        }
        Ok(())
    }

    /// Snapshot of the task's current result.
    pub fn result(&self) -> BuildResult {
        let state = self.state.lock();
        self.result_locked(&state)
    }

    /// Persistable record of the task as it is now.
    pub fn to_record(&self) -> BuildRecord {
        let state = self.state.lock();
        let configuration = &self.job.configuration;
        BuildRecord {
            id: ResourceId::new(),
            configuration_id: configuration.id,
            configuration_name: configuration.name.clone(),
            scm_repo_url: configuration.scm_repo_url.clone(),
            scm_revision: configuration.scm_revision.clone(),
            status: state.status,
            submitted_at: self.job.submitted_at,
            ended_at: state.last_status_update_at,
            log: state
                .details
                .as_ref()
                .map(|d| d.log.clone())
                .or_else(|| state.last_error.as_ref().map(|e| e.message.clone()))
                .unwrap_or_default(),
            attributes: Default::default(),
        }
    }

    fn result_locked(&self, state: &TaskState) -> BuildResult {
        BuildResult {
            identity: self.identity,
            configuration_name: self.job.configuration.name.clone(),
            status: state.status,
            details: state.details.clone(),
            error: state.last_error.clone(),
        }
    }
}

impl PartialEq for BuildTask {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for BuildTask {}

impl Hash for BuildTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTask")
            .field("identity", &self.identity)
            .field("configuration", &self.job.configuration.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::build::BuildConfiguration;
    use buildit_core::{Operation, State};
    use std::collections::HashSet;

    fn context() -> TaskContext {
        TaskContext {
            running: Arc::new(RunningTaskSet::new()),
            queue: Arc::new(BuildTaskQueue::new()),
        }
    }

    fn job(name: &str) -> BuildJobConfiguration {
        BuildJobConfiguration::new(BuildConfiguration::new(
            name,
            format!("https://git.example.com/{}.git", name),
        ))
    }

    fn running() -> TaskStatus {
        TaskStatus::new(Operation::Build, State::Running)
    }

    fn completed() -> TaskStatus {
        TaskStatus::new(Operation::CollectResults, State::Completed)
    }

    #[test]
    fn test_terminal_status_enqueues_once() {
        let ctx = context();
        let (task, _completion) = BuildTask::new(job("proj-1"), ctx.clone());

        task.update_status(running()).unwrap();
        assert_eq!(ctx.queue.len(), 0);

        task.update_status(completed()).unwrap();
        assert_eq!(ctx.queue.len(), 1);

        // Nothing leaves a terminal state, so nothing is queued again.
        let err = task
            .update_status(TaskStatus::new(Operation::Update, State::Failed))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(ctx.queue.len(), 1);
        assert_eq!(task.status(), completed());

        let entry = ctx.queue.try_take().unwrap();
        assert!(matches!(entry.outcome, TaskOutcome::Finished(s) if s == completed()));
        assert!(ctx.queue.try_take().is_none());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let (task, _completion) = BuildTask::new(job("proj-1"), context());
        task.update_status(running()).unwrap();

        let err = task
            .update_status(TaskStatus::new(Operation::Build, State::WaitingForDependencies))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: State::Running,
                to: State::WaitingForDependencies,
                ..
            }
        ));
        assert_eq!(task.status(), running());
    }

    #[test]
    fn test_status_update_is_published() {
        let (task, _completion) = BuildTask::new(job("proj-1"), context());
        let mut status = task.subscribe_status();
        let before = task.last_status_update_at();

        task.update_status(running()).unwrap();

        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), running());
        assert!(task.last_status_update_at() >= before);
    }

    #[test]
    fn test_status_events_keep_every_update() {
        let (task, _completion) = BuildTask::new(job("proj-1"), context());

        task.update_status(TaskStatus::new(Operation::Build, State::WaitingForDependencies))
            .unwrap();
        task.update_status(running()).unwrap();
        task.update_status(completed()).unwrap();

        let mut events = task.take_status_events().unwrap();
        assert!(task.take_status_events().is_none());
        let states: Vec<State> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|s| s.state)
            .collect();
        assert_eq!(
            states,
            vec![State::WaitingForDependencies, State::Running, State::Completed]
        );
    }

    #[test]
    fn test_record_log_falls_back_to_error_message() {
        let ctx = context();
        let (task, _completion) = BuildTask::new(job("proj-1"), ctx.clone());
        task.on_error(DriverError::new("agent lost"));
        task.apply_error_status(TaskStatus::new(Operation::Build, State::SystemError));

        let record = task.to_record();
        assert_eq!(record.log, "agent lost");
        assert_eq!(record.status.state, State::SystemError);
    }

    #[test]
    fn test_error_routes_to_queue_without_changing_status() {
        let ctx = context();
        let (task, _completion) = BuildTask::new(job("proj-1"), ctx.clone());
        task.update_status(running()).unwrap();

        task.on_error(DriverError::new("agent lost"));

        assert_eq!(task.status(), running());
        assert_eq!(task.last_error(), Some(DriverError::new("agent lost")));
        let entry = ctx.queue.try_take().unwrap();
        assert!(matches!(entry.outcome, TaskOutcome::Errored(ref e) if e.message == "agent lost"));

        // The driver reporting a terminal status afterwards must not queue it twice.
        task.update_status(completed()).unwrap();
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn test_error_after_terminal_is_recorded_only() {
        let ctx = context();
        let (task, _completion) = BuildTask::new(job("proj-1"), ctx.clone());
        task.update_status(completed()).unwrap();

        task.on_error(DriverError::new("late"));

        assert_eq!(ctx.queue.len(), 1);
        assert!(task.last_error().is_some());
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let ctx = context();
        let (task, completion) = BuildTask::new(job("proj-1"), ctx.clone());
        ctx.running.submit(task.clone()).unwrap();
        task.update_status(completed()).unwrap();

        task.on_complete().unwrap();
        assert!(ctx.running.is_empty());

        let err = task.on_complete().unwrap_err();
        assert!(matches!(err, Error::AlreadyCompleted(_)));
        assert!(task.is_completed());

        let result = completion.await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.configuration_name, "proj-1");
    }

    #[test]
    fn test_second_complete_does_not_remove_resubmission() {
        let ctx = context();
        let job = job("proj-1");
        let (first, _c1) = BuildTask::new(job.clone(), ctx.clone());
        ctx.running.submit(first.clone()).unwrap();
        first.on_complete().unwrap();

        let (second, _c2) = BuildTask::new(job, ctx.clone());
        ctx.running.submit(second.clone()).unwrap();

        assert!(first.on_complete().is_err());
        assert!(ctx.running.contains(&second.identity()));
    }

    #[test]
    fn test_equality_by_configuration_identity() {
        let job = job("proj-1");
        let (a, _ca) = BuildTask::new(job.clone(), context());
        let (b, _cb) = BuildTask::new(job, context());
        let (c, _cc) = BuildTask::new(self::job("proj-2"), context());

        assert_eq!(*a, *b);
        assert_ne!(*a, *c);

        let mut set = HashSet::new();
        set.insert(a.identity());
        set.insert(b.identity());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_apply_error_status_does_not_enqueue() {
        let ctx = context();
        let (task, _completion) = BuildTask::new(job("proj-1"), ctx.clone());
        task.on_error(DriverError::new("boom"));
        ctx.queue.try_take().unwrap();

        task.apply_error_status(TaskStatus::new(Operation::Build, State::SystemError));

        assert_eq!(task.status().state, State::SystemError);
        assert!(ctx.queue.is_empty());
    }
}
