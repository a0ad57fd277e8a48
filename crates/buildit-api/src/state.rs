//! Application state.

use async_trait::async_trait;
use buildit_config::SystemConfig;
use buildit_coordinator::{BuildCoordinator, CoordinatorContext};
use buildit_core::driver::BuildDriver;
use buildit_core::workflow::{
    BuildResultCallback, EngineError, ProcessStartRequest, WorkflowEngine,
};
use buildit_db::{
    MemArtifactRepo, MemBuildRecordRepo, MemMilestoneRepo, MemProductVersionRepo, MemReleaseRepo,
};
use buildit_notify::Notifier;
use buildit_workflow::{
    HttpWorkflowEngine, MilestoneReleaseManager, ReleaseRepositories, WorkflowCorrelator,
    WorkflowError,
};
use std::sync::Arc;
use tracing::warn;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub notifier: Arc<Notifier>,
    pub correlator: Arc<WorkflowCorrelator>,
    pub releases: Arc<MilestoneReleaseManager>,
    pub repos: ReleaseRepositories,
    /// Absent when no build driver is wired in.
    pub coordinator: Option<Arc<BuildCoordinator>>,
}

impl AppState {
    pub fn new(
        config: &SystemConfig,
        driver: Option<Arc<dyn BuildDriver>>,
    ) -> Result<Self, WorkflowError> {
        let notifier = Arc::new(Notifier::new());
        let build_records = Arc::new(MemBuildRecordRepo::new());
        let repos = ReleaseRepositories {
            releases: Arc::new(MemReleaseRepo::new()),
            milestones: Arc::new(MemMilestoneRepo::new()),
            product_versions: Arc::new(MemProductVersionRepo::new()),
            build_records: build_records.clone(),
            artifacts: Arc::new(MemArtifactRepo::new()),
        };

        let http_engine = config
            .workflow_engine
            .as_ref()
            .map(HttpWorkflowEngine::new)
            .transpose()?
            .map(Arc::new);
        let engine: Arc<dyn WorkflowEngine> = match &http_engine {
            Some(engine) => engine.clone(),
            None => {
                warn!("No workflow engine configured, releases are disabled");
                Arc::new(DisabledWorkflowEngine)
            }
        };
        let correlator = Arc::new(WorkflowCorrelator::new(engine));

        let process_id = config
            .workflow_engine
            .as_ref()
            .map(|e| e.release_process.clone())
            .unwrap_or_else(|| "milestone-release".to_string());
        let mut releases = MilestoneReleaseManager::new(
            repos.clone(),
            correlator.clone(),
            notifier.clone(),
            process_id,
        );
        if let Some(public_url) = &config.server.public_url {
            releases = releases.with_callback_base_url(format!(
                "{}/api/v1/workflow/callback",
                public_url.trim_end_matches('/')
            ));
        }

        let coordinator = driver.map(|driver| {
            let result_callback = http_engine
                .clone()
                .map(|engine| engine as Arc<dyn BuildResultCallback>);
            Arc::new(BuildCoordinator::new(CoordinatorContext {
                driver,
                records: build_records,
                notifier: notifier.clone(),
                result_callback,
            }))
        });

        Ok(Self {
            notifier,
            correlator,
            releases: Arc::new(releases),
            repos,
            coordinator,
        })
    }
}

/// Stand-in engine used when none is configured; refuses every start.
struct DisabledWorkflowEngine;

#[async_trait]
impl WorkflowEngine for DisabledWorkflowEngine {
    async fn start_process(&self, _request: &ProcessStartRequest) -> Result<(), EngineError> {
        Err(EngineError::NotConfigured)
    }
}
