//! Build coordinator - submits builds and drives them through a build driver.

use crate::processor::QueueProcessor;
use crate::queue::BuildTaskQueue;
use crate::running::RunningTaskSet;
use crate::task::{BuildTask, TaskContext};
use buildit_core::build::{BuildConfiguration, BuildJobConfiguration, BuildResult};
use buildit_core::driver::BuildDriver;
use buildit_core::notification::{BUILD_STATUS_TOPIC, Notification};
use buildit_core::workflow::BuildResultCallback;
use buildit_core::{BuildIdentity, Error, Operation, ResourceId, Result, State, TaskStatus};
use buildit_db::BuildRecordRepo;
use buildit_notify::Notifier;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Collaborators the coordinator is wired with.
#[derive(Clone)]
pub struct CoordinatorContext {
    pub driver: Arc<dyn BuildDriver>,
    pub records: Arc<dyn BuildRecordRepo>,
    pub notifier: Arc<Notifier>,
    pub result_callback: Option<Arc<dyn BuildResultCallback>>,
}

/// Entry point for builds.
pub struct BuildCoordinator {
    context: CoordinatorContext,
    running: Arc<RunningTaskSet>,
    queue: Arc<BuildTaskQueue>,
}

impl BuildCoordinator {
    pub fn new(context: CoordinatorContext) -> Self {
        Self {
            context,
            running: Arc::new(RunningTaskSet::new()),
            queue: Arc::new(BuildTaskQueue::new()),
        }
    }

    pub fn running(&self) -> &Arc<RunningTaskSet> {
        &self.running
    }

    pub fn queue(&self) -> &Arc<BuildTaskQueue> {
        &self.queue
    }

    /// Submit a build of `configuration`.
    ///
    /// Fails with `DuplicateTask` while a build of the same configuration is
    /// still in flight. Must be called inside a tokio runtime.
    pub fn build(
        &self,
        configuration: BuildConfiguration,
        callback_url: Option<String>,
    ) -> Result<BuildHandle> {
        let mut job = BuildJobConfiguration::new(configuration);
        job.callback_url = callback_url;

        let task_context = TaskContext {
            running: self.running.clone(),
            queue: self.queue.clone(),
        };
        let (task, completion) = BuildTask::new(job, task_context);
        self.running.submit(task.clone())?;

        let configuration = &task.job_configuration().configuration;
        info!(
            build = %task.identity(),
            configuration = %configuration.name,
            "Build submitted"
        );

        let status = task.subscribe_status();
        if let Some(events) = task.take_status_events() {
            tokio::spawn(forward_status(
                configuration.id,
                configuration.name.clone(),
                events,
                self.context.notifier.clone(),
            ));
        }
        tokio::spawn(drive_build(
            task.clone(),
            self.context.driver.clone(),
            self.running.clone(),
        ));

        Ok(BuildHandle {
            task,
            status,
            completion,
        })
    }

    /// Spawn `count` queue processors sharing this coordinator's queue.
    pub fn spawn_processors(&self, count: usize, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let processor = QueueProcessor::new(
                    format!("processor-{}", i),
                    self.queue.clone(),
                    self.context.records.clone(),
                    self.context.result_callback.clone(),
                );
                let shutdown = shutdown.clone();
                tokio::spawn(async move { processor.run(shutdown).await })
            })
            .collect()
    }
}

/// Submitter's view of one build.
pub struct BuildHandle {
    task: Arc<BuildTask>,
    status: watch::Receiver<TaskStatus>,
    completion: oneshot::Receiver<BuildResult>,
}

impl fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildHandle")
            .field("task", &self.task)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl BuildHandle {
    pub fn identity(&self) -> BuildIdentity {
        self.task.identity()
    }

    pub fn task(&self) -> &Arc<BuildTask> {
        &self.task
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<TaskStatus> {
        self.status.clone()
    }

    /// Wait for the build to be completed and return its result.
    pub async fn wait(self) -> Result<BuildResult> {
        let identity = self.task.identity();
        drop(self.task);
        self.completion
            .await
            .map_err(|_| Error::Internal(format!("build {} was dropped before completing", identity)))
    }
}

async fn drive_build(
    task: Arc<BuildTask>,
    driver: Arc<dyn BuildDriver>,
    running: Arc<RunningTaskSet>,
) {
    let build = task.identity();

    if let Err(e) = wait_for_dependencies(&task, &running).await {
        error!(build = %build, error = %e, "Dependency wait failed");
        return;
    }
    if let Err(e) = task.update_status(TaskStatus::new(Operation::Build, State::Running)) {
        error!(build = %build, error = %e, "Could not start build");
        return;
    }

    let repository = task.repository_configuration();
    let handle = match driver
        .start_build(task.job_configuration(), repository.as_ref())
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            task.on_error(e);
            return;
        }
    };
    debug!(build = %build, driver = handle.driver_name, driver_id = %handle.driver_id, "Build started");

    match driver.monitor(handle).await {
        Ok(details) => {
            let state = if details.success {
                State::Completed
            } else {
                State::Failed
            };
            info!(build = %build, job = %details.job_name, state = %state, "Build finished");
            task.set_job_details(details);
            if let Err(e) = task.update_status(TaskStatus::new(Operation::CollectResults, state)) {
                error!(build = %build, error = %e, "Could not record build result");
            }
        }
        Err(e) => task.on_error(e),
    }
}

/// Report WAITING_FOR_DEPENDENCIES until no dependency is running.
async fn wait_for_dependencies(task: &Arc<BuildTask>, running: &RunningTaskSet) -> Result<()> {
    let own = task.identity();
    let dependencies: Vec<BuildIdentity> = task
        .job_configuration()
        .configuration
        .dependencies
        .iter()
        .map(|id| BuildIdentity::of_configuration(*id))
        .filter(|id| *id != own)
        .collect();
    if dependencies.is_empty() {
        return Ok(());
    }

    // Subscribe before checking so no removal slips between check and wait.
    let mut generation = running.subscribe();
    let mut waiting = false;
    loop {
        let pending = dependencies.iter().filter(|id| running.contains(id)).count();
        if pending == 0 {
            return Ok(());
        }
        if !waiting {
            info!(build = %own, pending, "Waiting for dependencies");
            task.update_status(TaskStatus::new(
                Operation::Build,
                State::WaitingForDependencies,
            ))?;
            waiting = true;
        }
        if generation.changed().await.is_err() {
            return Ok(());
        }
    }
}

/// Push every status change to subscribers, in order, until the task turns terminal.
async fn forward_status(
    configuration_id: ResourceId,
    configuration_name: String,
    mut events: mpsc::UnboundedReceiver<TaskStatus>,
    notifier: Arc<Notifier>,
) {
    let qualifier = configuration_id.to_string();
    while let Some(current) = events.recv().await {
        let message = Notification::BuildStatusChanged {
            configuration_id,
            configuration_name: configuration_name.clone(),
            status: current,
        };
        notifier
            .send_to_subscribers(&message, BUILD_STATUS_TOPIC, &qualifier)
            .await;
        if current.is_terminal() {
            break;
        }
    }
}
