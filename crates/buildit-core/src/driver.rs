//! Build driver trait.
//!
//! Drivers run builds in an external system (a CI server, a container
//! platform). The coordinator only starts them and waits for the outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::{BuildJobConfiguration, BuildJobDetails, RepositoryConfiguration};
use crate::id::BuildIdentity;

/// Failure reported by a build driver.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("build driver error: {message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Handle to a build started by a driver.
///
/// Not `Clone`: `monitor` consumes it, so each started build has exactly one
/// result registration.
#[derive(Debug)]
pub struct DriverHandle {
    pub identity: BuildIdentity,
    /// Driver-specific identifier (e.g. job name and build number).
    pub driver_id: String,
    pub driver_name: &'static str,
}

#[async_trait]
pub trait BuildDriver: Send + Sync {
    /// Name of this driver.
    fn name(&self) -> &'static str;

    /// Start the build described by `job`.
    async fn start_build(
        &self,
        job: &BuildJobConfiguration,
        repository: Option<&RepositoryConfiguration>,
    ) -> Result<DriverHandle, DriverError>;

    /// Wait for a started build to finish.
    async fn monitor(&self, handle: DriverHandle) -> Result<BuildJobDetails, DriverError>;
}
