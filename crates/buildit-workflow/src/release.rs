//! Milestone releases driven by a remote workflow process.
//!
//! Starting a release records an IN_PROGRESS attempt and starts the release
//! process. The process reports back once: `IMPORT_SUCCESS` with a
//! [`MilestoneReleaseResult`], or `IMPORT_ERROR` with whatever the engine
//! had to say. Either result closes the attempt.

use buildit_core::notification::{MILESTONE_RELEASE_TOPIC, Notification};
use buildit_core::release::{
    ArtifactImportError, BuildImportResult, BuildImportStatus, MilestoneReleaseResult,
    MilestoneReleaseStatus, ProductMilestone, ProductMilestoneRelease,
};
use buildit_core::workflow::EventType;
use buildit_core::{CorrelationId, Error, ResourceId, Result};
use buildit_db::{ArtifactRepo, BuildRecordRepo, MilestoneRepo, ProductVersionRepo, ReleaseRepo};
use buildit_notify::Notifier;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::correlator::{WorkflowCorrelator, WorkflowTask};

/// Build record attribute holding the external build id.
pub const BREW_ID: &str = "brewId";
/// Build record attribute holding the external build URL.
pub const BREW_LINK: &str = "brewLink";

const SEPARATOR: &str = "\n-------------------------------------------------------------------------\n";

/// Storage the release manager reads and writes.
#[derive(Clone)]
pub struct ReleaseRepositories {
    pub releases: Arc<dyn ReleaseRepo>,
    pub milestones: Arc<dyn MilestoneRepo>,
    pub product_versions: Arc<dyn ProductVersionRepo>,
    pub build_records: Arc<dyn BuildRecordRepo>,
    pub artifacts: Arc<dyn ArtifactRepo>,
}

pub struct MilestoneReleaseManager {
    recorder: Arc<ReleaseRecorder>,
    correlator: Arc<WorkflowCorrelator>,
    process_id: String,
    callback_base_url: Option<String>,
    /// Milestones between the in-progress check and the saved attempt.
    starting: Mutex<HashSet<ResourceId>>,
}

impl MilestoneReleaseManager {
    pub fn new(
        repos: ReleaseRepositories,
        correlator: Arc<WorkflowCorrelator>,
        notifier: Arc<Notifier>,
        process_id: impl Into<String>,
    ) -> Self {
        Self {
            recorder: Arc::new(ReleaseRecorder { repos, notifier }),
            correlator,
            process_id: process_id.into(),
            callback_base_url: None,
            starting: Mutex::new(HashSet::new()),
        }
    }

    /// Base URL the engine posts results to. The correlation id is appended
    /// per process; the engine appends the event type.
    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    /// Start releasing `milestone_id`.
    ///
    /// Returns the recorded attempt. If the engine refuses to start the
    /// process the attempt is returned already closed with SYSTEM_ERROR.
    pub async fn start_release(
        &self,
        milestone_id: ResourceId,
        access_token: &str,
    ) -> Result<ProductMilestoneRelease> {
        let repos = &self.recorder.repos;
        let milestone = repos
            .milestones
            .find_by_id(milestone_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("milestone {}", milestone_id)))?;

        let in_progress = || {
            Error::Conflict(format!(
                "milestone {} already has a release in progress",
                milestone_id
            ))
        };
        let Some(guard) = StartGuard::acquire(&self.starting, milestone_id) else {
            return Err(in_progress());
        };
        if !self.no_release_in_progress(milestone_id).await? {
            return Err(in_progress());
        }

        let mut release = ProductMilestoneRelease::start(milestone_id);
        release.log.push_str("Release push task started\n");
        let mut release = repos.releases.save(release).await?;
        // From here on the saved attempt itself blocks other starts.
        drop(guard);
        info!(milestone_id = %milestone_id, release_id = %release.id, "Milestone release started");

        let task = self.release_task(&release, &milestone, access_token);
        if let Err(e) = self.correlator.start_process(task).await {
            error!(milestone_id = %milestone_id, error = %e, "Could not start release process");
            release.log.push_str("Release push task creation failed.\nCheck log for more details.\n");
            release.status = MilestoneReleaseStatus::SystemError;
            release.end_date = Some(Utc::now());
            release = repos.releases.save(release).await?;
        }

        self.recorder.announce(&release).await;
        Ok(release)
    }

    /// True when the latest attempt for the milestone is not IN_PROGRESS.
    pub async fn no_release_in_progress(&self, milestone_id: ResourceId) -> Result<bool> {
        let latest = self.latest_release(milestone_id).await?;
        Ok(latest.is_none_or(|r| r.status != MilestoneReleaseStatus::InProgress))
    }

    pub async fn latest_release(
        &self,
        milestone_id: ResourceId,
    ) -> Result<Option<ProductMilestoneRelease>> {
        Ok(self
            .recorder
            .repos
            .releases
            .find_latest_by_milestone(milestone_id)
            .await?)
    }

    pub fn correlator(&self) -> &Arc<WorkflowCorrelator> {
        &self.correlator
    }

    fn release_task(
        &self,
        release: &ProductMilestoneRelease,
        milestone: &ProductMilestone,
        access_token: &str,
    ) -> WorkflowTask {
        let correlation_id = CorrelationId::from(release.id);
        let callback_url = self
            .callback_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base, correlation_id));
        let payload = json!({
            "milestoneId": milestone.id,
            "milestoneVersion": milestone.version,
            "accessToken": access_token,
            "callbackUrl": callback_url,
        });

        let mut task =
            WorkflowTask::new(correlation_id.clone(), self.process_id.clone(), payload);
        let milestone_id = milestone.id;
        let release_id = release.id;

        // Either result closes the attempt, so the other listener is dropped with it.
        let recorder = self.recorder.clone();
        let correlator = Arc::downgrade(&self.correlator);
        let id = correlation_id.clone();
        task.add_listener(EventType::ImportSuccess, move |result: MilestoneReleaseResult| async move {
            recorder.store_success(milestone_id, release_id, result).await;
            drop_process(&correlator, &id);
        });
        let recorder = self.recorder.clone();
        let correlator = Arc::downgrade(&self.correlator);
        task.add_raw_listener(EventType::ImportError, move |payload| async move {
            recorder.store_failure(milestone_id, release_id, payload).await;
            drop_process(&correlator, &correlation_id);
        });
        task
    }
}

/// Applies release results; shared with the listeners.
struct ReleaseRecorder {
    repos: ReleaseRepositories,
    notifier: Arc<Notifier>,
}

impl ReleaseRecorder {
    async fn store_success(
        &self,
        milestone_id: ResourceId,
        release_id: ResourceId,
        result: MilestoneReleaseResult,
    ) {
        debug!(milestone_id = %milestone_id, status = %result.release_status, "Storing milestone release result");
        let Some(mut milestone) = self.find_milestone(milestone_id).await else {
            return;
        };

        let description = self.describe_completed_push(&result).await;
        self.update_release(
            release_id,
            &description,
            result.release_status.milestone_release_status(),
        )
        .await;

        for build in &result.builds {
            self.store_build_attributes(build).await;
        }

        milestone.end_date = Some(Utc::now());
        let product_version_id = milestone.product_version_id;
        if let Err(e) = self.repos.milestones.save(milestone).await {
            error!(milestone_id = %milestone_id, error = %e, "Failed to store milestone end date");
        }
        self.clear_current_milestone(product_version_id, milestone_id).await;
    }

    async fn store_failure(&self, milestone_id: ResourceId, release_id: ResourceId, payload: Value) {
        debug!(milestone_id = %milestone_id, "Storing failed milestone release result");
        if self.find_milestone(milestone_id).await.is_none() {
            return;
        }
        let message = format!("IMPORT FAILED\nResult: {}\n", payload);
        self.update_release(release_id, &message, MilestoneReleaseStatus::SystemError)
            .await;
    }

    async fn find_milestone(&self, milestone_id: ResourceId) -> Option<ProductMilestone> {
        match self.repos.milestones.find_by_id(milestone_id).await {
            Ok(Some(milestone)) => Some(milestone),
            Ok(None) => {
                error!(milestone_id = %milestone_id, "No milestone found for release result");
                None
            }
            Err(e) => {
                error!(milestone_id = %milestone_id, error = %e, "Failed to load milestone");
                None
            }
        }
    }

    async fn update_release(
        &self,
        release_id: ResourceId,
        message: &str,
        status: MilestoneReleaseStatus,
    ) {
        let mut release = match self.repos.releases.find_by_id(release_id).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                error!(release_id = %release_id, "No milestone release found");
                return;
            }
            Err(e) => {
                error!(release_id = %release_id, error = %e, "Failed to load milestone release");
                return;
            }
        };
        let milestone_id = release.milestone_id;

        if status != MilestoneReleaseStatus::InProgress {
            release.end_date = Some(Utc::now());
        }
        release.status = status;
        release.log.push_str(message);

        match self.repos.releases.save(release).await {
            Ok(saved) => {
                info!(milestone_id = %milestone_id, release_id = %saved.id, status = %status, "Milestone release updated");
                self.announce(&saved).await;
            }
            Err(e) => error!(milestone_id = %milestone_id, error = %e, "Failed to store milestone release"),
        }
    }

    async fn store_build_attributes(&self, build: &BuildImportResult) {
        let record_id = build.build_record_id;
        let mut record = match self.repos.build_records.find_by_id(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                error!(record_id = %record_id, "No build record found, skipped storing import info");
                return;
            }
            Err(e) => {
                error!(record_id = %record_id, error = %e, "Failed to load build record");
                return;
            }
        };

        if let Some(id) = build.brew_build_id {
            record.put_attribute(BREW_ID, id.to_string());
        }
        if let Some(url) = &build.brew_build_url {
            record.put_attribute(BREW_LINK, url.clone());
        }
        if let Err(e) = self.repos.build_records.save(record).await {
            error!(record_id = %record_id, error = %e, "Failed to store build record attributes");
        }
    }

    async fn clear_current_milestone(&self, product_version_id: ResourceId, milestone_id: ResourceId) {
        let version = match self.repos.product_versions.find_by_id(product_version_id).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                warn!(product_version_id = %product_version_id, "Milestone has no product version");
                return;
            }
            Err(e) => {
                error!(product_version_id = %product_version_id, error = %e, "Failed to load product version");
                return;
            }
        };

        if version.current_milestone_id != Some(milestone_id) {
            return;
        }
        let mut version = version;
        version.current_milestone_id = None;
        match self.repos.product_versions.save(version).await {
            Ok(_) => info!(product_version_id = %product_version_id, milestone_id = %milestone_id, "Released milestone is no longer current"),
            Err(e) => error!(product_version_id = %product_version_id, error = %e, "Failed to clear current milestone"),
        }
    }

    async fn describe_completed_push(&self, result: &MilestoneReleaseResult) -> String {
        let mut out = String::new();
        let outcome = if result.is_successful() { "SUCCEEDED" } else { "FAILED" };
        let _ = writeln!(out, "Release push {}", outcome);
        out.push_str("Import details:\n");
        if let Some(message) = &result.error_message {
            let _ = writeln!(out, "{}", message);
        }
        for build in &result.builds {
            self.describe_build_import(&mut out, build).await;
        }
        out
    }

    async fn describe_build_import(&self, out: &mut String, build: &BuildImportResult) {
        let record = self
            .repos
            .build_records
            .find_by_id(build.build_record_id)
            .await
            .ok()
            .flatten();

        out.push_str(SEPARATOR);
        let _ = writeln!(
            out,
            "{} [buildRecordId: {}, built from {} rev {}] import {}. Brew build id: {}, Brew build url: {}",
            or_dash(record.as_ref().map(|r| r.configuration_name.as_str())),
            build.build_record_id,
            or_dash(record.as_ref().map(|r| r.scm_repo_url.as_str())),
            or_dash(record.as_ref().and_then(|r| r.scm_revision.as_deref())),
            build.status,
            or_dash(build.brew_build_id),
            or_dash(build.brew_build_url.as_deref()),
        );

        if build.status != BuildImportStatus::Successful {
            let _ = write!(out, "Error message: {}", or_dash(build.error_message.as_deref()));
            for artifact_error in &build.errors {
                self.describe_artifact_error(out, artifact_error).await;
            }
        }
        out.push('\n');
    }

    async fn describe_artifact_error(&self, out: &mut String, artifact_error: &ArtifactImportError) {
        let artifact = self
            .repos
            .artifacts
            .find_by_id(artifact_error.artifact_id)
            .await
            .ok()
            .flatten();
        let _ = writeln!(
            out,
            "Failed to import {} [artifactId:{}]. Error message: {}",
            or_dash(artifact.as_ref().map(|a| a.identifier.as_str())),
            artifact_error.artifact_id,
            artifact_error.error_message,
        );
    }

    async fn announce(&self, release: &ProductMilestoneRelease) {
        let message = Notification::MilestoneReleaseChanged {
            milestone_id: release.milestone_id,
            status: release.status,
        };
        self.notifier
            .send_to_subscribers(
                &message,
                MILESTONE_RELEASE_TOPIC,
                &release.milestone_id.to_string(),
            )
            .await;
    }
}

/// Marks a milestone as starting a release until dropped.
struct StartGuard<'a> {
    starting: &'a Mutex<HashSet<ResourceId>>,
    milestone_id: ResourceId,
}

impl<'a> StartGuard<'a> {
    fn acquire(starting: &'a Mutex<HashSet<ResourceId>>, milestone_id: ResourceId) -> Option<Self> {
        // Lazily built: a guard created for a losing caller would free the slot on drop.
        starting.lock().insert(milestone_id).then(|| Self {
            starting,
            milestone_id,
        })
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.starting.lock().remove(&self.milestone_id);
    }
}

fn drop_process(correlator: &Weak<WorkflowCorrelator>, correlation_id: &CorrelationId) {
    if let Some(correlator) = correlator.upgrade() {
        correlator.abandon(correlation_id);
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use buildit_core::build::BuildRecord;
    use buildit_core::release::{Artifact, ProductVersion, ReleaseStatus};
    use buildit_core::workflow::{EngineError, ProcessStartRequest, WorkflowEngine};
    use buildit_core::{Operation, State, TaskStatus};
    use buildit_db::{
        MemArtifactRepo, MemBuildRecordRepo, MemMilestoneRepo, MemProductVersionRepo,
        MemReleaseRepo,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockEngine {
        fail: bool,
        started: Mutex<Vec<ProcessStartRequest>>,
    }

    #[async_trait]
    impl WorkflowEngine for MockEngine {
        async fn start_process(
            &self,
            request: &ProcessStartRequest,
        ) -> std::result::Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::Request("connection refused".to_string()));
            }
            self.started.lock().push(request.clone());
            Ok(())
        }
    }

    struct Fixture {
        manager: MilestoneReleaseManager,
        engine: Arc<MockEngine>,
        releases: Arc<MemReleaseRepo>,
        milestones: Arc<MemMilestoneRepo>,
        versions: Arc<MemProductVersionRepo>,
        records: Arc<MemBuildRecordRepo>,
        artifacts: Arc<MemArtifactRepo>,
        milestone: ProductMilestone,
    }

    impl Fixture {
        async fn new(fail: bool) -> Self {
            let engine = Arc::new(MockEngine {
                fail,
                ..Default::default()
            });
            let releases = Arc::new(MemReleaseRepo::new());
            let milestones = Arc::new(MemMilestoneRepo::new());
            let versions = Arc::new(MemProductVersionRepo::new());
            let records = Arc::new(MemBuildRecordRepo::new());
            let artifacts = Arc::new(MemArtifactRepo::new());

            let version_id = ResourceId::new();
            let milestone = ProductMilestone {
                id: ResourceId::new(),
                version: "1.0.0.CR1".to_string(),
                product_version_id: version_id,
                starting_date: Some(Utc::now()),
                end_date: None,
            };
            milestones.save(milestone.clone()).await.unwrap();
            versions
                .save(ProductVersion {
                    id: version_id,
                    version: "1.0".to_string(),
                    current_milestone_id: Some(milestone.id),
                })
                .await
                .unwrap();

            let repos = ReleaseRepositories {
                releases: releases.clone(),
                milestones: milestones.clone(),
                product_versions: versions.clone(),
                build_records: records.clone(),
                artifacts: artifacts.clone(),
            };
            let correlator = Arc::new(WorkflowCorrelator::new(engine.clone()));
            let manager = MilestoneReleaseManager::new(
                repos,
                correlator,
                Arc::new(Notifier::new()),
                "milestone-release",
            )
            .with_callback_base_url("https://buildit.example.com/api/v1/workflow/callback/");

            Self {
                manager,
                engine,
                releases,
                milestones,
                versions,
                records,
                artifacts,
                milestone,
            }
        }

        async fn stored_release(&self) -> ProductMilestoneRelease {
            self.releases
                .find_latest_by_milestone(self.milestone.id)
                .await
                .unwrap()
                .unwrap()
        }

        fn correlation_id(&self) -> CorrelationId {
            self.engine.started.lock()[0].correlation_id.clone()
        }
    }

    fn build_record(name: &str) -> BuildRecord {
        let now = Utc::now();
        BuildRecord {
            id: ResourceId::new(),
            configuration_id: ResourceId::new(),
            configuration_name: name.to_string(),
            scm_repo_url: format!("https://git.example.com/{}.git", name),
            scm_revision: Some("abc123".to_string()),
            status: TaskStatus::new(Operation::CollectResults, State::Completed),
            submitted_at: now,
            ended_at: now,
            log: String::new(),
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_start_release_records_in_progress() {
        let fx = Fixture::new(false).await;

        let release = fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        assert_eq!(release.status, MilestoneReleaseStatus::InProgress);
        assert_eq!(release.log, "Release push task started\n");
        assert!(!fx.manager.no_release_in_progress(fx.milestone.id).await.unwrap());

        let started = fx.engine.started.lock().clone();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].process_id, "milestone-release");
        assert_eq!(started[0].correlation_id, CorrelationId::from(release.id));
        assert_eq!(started[0].payload["accessToken"], "token");
        assert_eq!(
            started[0].payload["callbackUrl"],
            format!(
                "https://buildit.example.com/api/v1/workflow/callback/{}",
                release.id
            )
        );
        assert!(fx.manager.correlator().is_pending(&started[0].correlation_id));
    }

    #[tokio::test]
    async fn test_second_release_refused_while_in_progress() {
        let fx = Fixture::new(false).await;
        fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        let err = fx
            .manager
            .start_release(fx.milestone.id, "token")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(fx.engine.started.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_accept_one() {
        let fx = Arc::new(Fixture::new(false).await);

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let fx = fx.clone();
                tokio::spawn(async move { fx.manager.start_release(fx.milestone.id, "token").await })
            })
            .collect();
        let mut accepted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(release) => {
                    assert_eq!(release.status, MilestoneReleaseStatus::InProgress);
                    accepted += 1;
                }
                Err(e) => assert!(matches!(e, Error::Conflict(_)), "unexpected error: {e}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(fx.engine.started.lock().len(), 1);
        assert_eq!(fx.manager.correlator().pending_count(), 1);
    }

    #[tokio::test]
    async fn test_result_updates_its_own_attempt() {
        let fx = Fixture::new(false).await;
        let first = fx.manager.start_release(fx.milestone.id, "token").await.unwrap();
        let correlation_id = fx.correlation_id();

        // A newer attempt recorded elsewhere for the same milestone.
        let mut newer = ProductMilestoneRelease::start(fx.milestone.id);
        newer.starting_date = first.starting_date + chrono::Duration::seconds(1);
        let newer = fx.releases.save(newer).await.unwrap();

        fx.manager
            .correlator()
            .dispatch(&correlation_id, EventType::ImportError, json!({ "message": "late" }))
            .await;

        let first = fx.releases.find_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, MilestoneReleaseStatus::SystemError);
        assert!(first.log.contains("IMPORT FAILED"));

        let newer = fx.releases.find_by_id(newer.id).await.unwrap().unwrap();
        assert_eq!(newer.status, MilestoneReleaseStatus::InProgress);
        assert!(!newer.log.contains("IMPORT FAILED"));
    }

    #[tokio::test]
    async fn test_unknown_milestone() {
        let fx = Fixture::new(false).await;
        let err = fx
            .manager
            .start_release(ResourceId::new(), "token")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_engine_refusal_closes_release() {
        let fx = Fixture::new(true).await;

        let release = fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        assert_eq!(release.status, MilestoneReleaseStatus::SystemError);
        assert!(release.end_date.is_some());
        assert!(release.log.contains("Release push task creation failed."));
        assert_eq!(fx.manager.correlator().pending_count(), 0);
        assert!(fx.manager.no_release_in_progress(fx.milestone.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_success_updates_release_records_and_milestone() {
        let fx = Fixture::new(false).await;
        let imported = fx.records.save(build_record("lib")).await.unwrap();
        let failed = fx.records.save(build_record("app")).await.unwrap();
        let artifact = fx
            .artifacts
            .save(Artifact {
                id: ResourceId::new(),
                identifier: "org.example:app:jar:1.0".to_string(),
            })
            .await
            .unwrap();
        fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        let payload = json!({
            "milestoneId": fx.milestone.id,
            "releaseStatus": "FAILURE",
            "errorMessage": "one build failed",
            "builds": [
                {
                    "buildRecordId": imported.id,
                    "brewBuildId": 42,
                    "brewBuildUrl": "https://brew.example.com/build/42",
                    "status": "SUCCESSFUL",
                    "errorMessage": null
                },
                {
                    "buildRecordId": failed.id,
                    "brewBuildId": null,
                    "brewBuildUrl": null,
                    "status": "FAILED",
                    "errorMessage": "import rejected",
                    "errors": [{ "artifactId": artifact.id, "errorMessage": "checksum mismatch" }]
                }
            ]
        });
        fx.manager
            .correlator()
            .dispatch(&fx.correlation_id(), EventType::ImportSuccess, payload)
            .await;

        let release = fx.stored_release().await;
        assert_eq!(release.status, ReleaseStatus::Failure.milestone_release_status());
        assert!(release.end_date.is_some());
        assert!(release.log.starts_with("Release push task started\nRelease push FAILED\n"));
        assert!(release.log.contains("one build failed"));
        assert!(release.log.contains("lib [buildRecordId: "));
        assert!(release.log.contains("built from https://git.example.com/lib.git rev abc123"));
        assert!(release.log.contains("Error message: import rejected"));
        assert!(release.log.contains(
            "Failed to import org.example:app:jar:1.0"
        ));
        assert!(release.log.contains("Error message: checksum mismatch"));

        let imported = fx.records.find_by_id(imported.id).await.unwrap().unwrap();
        assert_eq!(imported.attributes.get(BREW_ID).map(String::as_str), Some("42"));
        assert_eq!(
            imported.attributes.get(BREW_LINK).map(String::as_str),
            Some("https://brew.example.com/build/42")
        );
        let failed = fx.records.find_by_id(failed.id).await.unwrap().unwrap();
        assert!(failed.attributes.is_empty());

        let milestone = fx.milestones.find_by_id(fx.milestone.id).await.unwrap().unwrap();
        assert!(milestone.end_date.is_some());
        let version = fx
            .versions
            .find_by_id(fx.milestone.product_version_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version.current_milestone_id, None);

        // The error listener went away together with the process.
        assert_eq!(fx.manager.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_import_success_marks_release_succeeded() {
        let fx = Fixture::new(false).await;
        fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        let payload = json!({
            "milestoneId": fx.milestone.id,
            "releaseStatus": "SUCCESS",
            "builds": []
        });
        fx.manager
            .correlator()
            .dispatch(&fx.correlation_id(), EventType::ImportSuccess, payload)
            .await;

        let release = fx.stored_release().await;
        assert_eq!(release.status, MilestoneReleaseStatus::Succeeded);
        assert!(release.log.contains("Release push SUCCEEDED\nImport details:\n"));
        assert!(fx.manager.no_release_in_progress(fx.milestone.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_error_marks_system_error() {
        let fx = Fixture::new(false).await;
        fx.manager.start_release(fx.milestone.id, "token").await.unwrap();

        fx.manager
            .correlator()
            .dispatch(
                &fx.correlation_id(),
                EventType::ImportError,
                json!({ "message": "brew unreachable" }),
            )
            .await;

        let release = fx.stored_release().await;
        assert_eq!(release.status, MilestoneReleaseStatus::SystemError);
        assert!(release.log.contains("IMPORT FAILED\nResult: "));
        assert!(release.log.contains("brew unreachable"));

        assert_eq!(fx.manager.correlator().pending_count(), 0);

        // Milestone stays open on failure.
        let milestone = fx.milestones.find_by_id(fx.milestone.id).await.unwrap().unwrap();
        assert!(milestone.end_date.is_none());
    }
}
