//! Build configuration and build result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;
use crate::driver::DriverError;
use crate::id::BuildIdentity;
use crate::status::TaskStatus;

/// A build configuration as defined by users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub id: ResourceId,
    pub name: String,
    /// SCM repository to build from.
    pub scm_repo_url: String,
    /// Revision (branch, tag or commit) to build.
    #[serde(default)]
    pub scm_revision: Option<String>,
    /// Script handed to the build driver.
    #[serde(default)]
    pub build_script: String,
    /// Environment variables for the build.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Configurations that must finish before this one may run.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
}

impl BuildConfiguration {
    pub fn new(name: impl Into<String>, scm_repo_url: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            scm_repo_url: scm_repo_url.into(),
            scm_revision: None,
            build_script: String::new(),
            environment: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn identity(&self) -> BuildIdentity {
        BuildIdentity::of_configuration(self.id)
    }
}

/// Frozen snapshot of the configuration a build was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJobConfiguration {
    pub configuration: BuildConfiguration,
    pub submitted_at: DateTime<Utc>,
    /// Where to POST the build result once it is post-processed.
    pub callback_url: Option<String>,
}

impl BuildJobConfiguration {
    pub fn new(configuration: BuildConfiguration) -> Self {
        Self {
            configuration,
            submitted_at: Utc::now(),
            callback_url: None,
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn identity(&self) -> BuildIdentity {
        self.configuration.identity()
    }
}

/// Repository manager setup prepared for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfiguration {
    pub repository_id: String,
    /// URL the build resolves dependencies from.
    pub dependency_url: String,
    /// URL the build deploys its output to.
    pub deploy_url: String,
}

/// What a build driver reports when a build ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobDetails {
    /// Name of the job in the driver's system.
    pub job_name: String,
    pub build_number: Option<u64>,
    pub success: bool,
    pub log: String,
}

/// Final result handed to whoever waits on a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub identity: BuildIdentity,
    pub configuration_name: String,
    pub status: TaskStatus,
    pub details: Option<BuildJobDetails>,
    pub error: Option<DriverError>,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Persisted record of a finished build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: ResourceId,
    pub configuration_id: ResourceId,
    pub configuration_name: String,
    pub scm_repo_url: String,
    pub scm_revision: Option<String>,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub log: String,
    /// Free-form attributes added after the build, such as external import ids.
    pub attributes: HashMap<String, String>,
}

impl BuildRecord {
    pub fn put_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }
}
