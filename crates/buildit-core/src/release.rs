//! Product milestones and milestone release types.
//!
//! A milestone release pushes the builds of a milestone into an external
//! build system through a remote workflow process. The process reports back
//! an import result per build.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// A version of a product, e.g. "1.2".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVersion {
    pub id: ResourceId,
    pub version: String,
    /// The milestone currently being worked on, if any.
    pub current_milestone_id: Option<ResourceId>,
}

/// A milestone of a product version, e.g. "1.2.0.CR1".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMilestone {
    pub id: ResourceId,
    pub version: String,
    pub product_version_id: ResourceId,
    pub starting_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Status of a milestone release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneReleaseStatus {
    #[display("IN_PROGRESS")]
    InProgress,
    #[display("SUCCEEDED")]
    Succeeded,
    #[display("FAILED")]
    Failed,
    #[display("SYSTEM_ERROR")]
    SystemError,
}

/// One attempt to release a milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMilestoneRelease {
    pub id: ResourceId,
    pub milestone_id: ResourceId,
    pub status: MilestoneReleaseStatus,
    pub log: String,
    pub starting_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl ProductMilestoneRelease {
    pub fn start(milestone_id: ResourceId) -> Self {
        Self {
            id: ResourceId::new(),
            milestone_id,
            status: MilestoneReleaseStatus::InProgress,
            log: String::new(),
            starting_date: Utc::now(),
            end_date: None,
        }
    }
}

/// A build output known to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ResourceId,
    /// Coordinates such as `org.example:lib:jar:1.0`.
    pub identifier: String,
}

/// Overall outcome reported by the release process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    #[display("SUCCESS")]
    Success,
    #[display("FAILURE")]
    Failure,
    #[display("IMPORT_ERROR")]
    ImportError,
    #[display("SET_UP_ERROR")]
    SetUpError,
    #[display("SYSTEM_ERROR")]
    SystemError,
}

impl ReleaseStatus {
    pub fn milestone_release_status(&self) -> MilestoneReleaseStatus {
        match self {
            ReleaseStatus::Success => MilestoneReleaseStatus::Succeeded,
            ReleaseStatus::Failure | ReleaseStatus::ImportError => MilestoneReleaseStatus::Failed,
            ReleaseStatus::SetUpError | ReleaseStatus::SystemError => {
                MilestoneReleaseStatus::SystemError
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildImportStatus {
    #[display("SUCCESSFUL")]
    Successful,
    #[display("FAILED")]
    Failed,
    #[display("ERROR")]
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactImportError {
    pub artifact_id: ResourceId,
    pub error_message: String,
}

/// Import result for one build record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildImportResult {
    pub build_record_id: ResourceId,
    pub brew_build_id: Option<u64>,
    pub brew_build_url: Option<String>,
    pub status: BuildImportStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub errors: Vec<ArtifactImportError>,
}

/// Payload of a successful release process completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneReleaseResult {
    pub milestone_id: ResourceId,
    pub release_status: ReleaseStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub builds: Vec<BuildImportResult>,
}

impl MilestoneReleaseResult {
    pub fn is_successful(&self) -> bool {
        self.release_status == ReleaseStatus::Success
    }
}
