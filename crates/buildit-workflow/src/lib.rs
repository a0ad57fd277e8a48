//! Remote workflow integration for the BuildIt build coordinator.
//!
//! Long-running work (milestone releases) runs in a remote workflow engine.
//! The [`WorkflowCorrelator`] links each started process to the listeners
//! waiting for its results, which arrive later on an inbound callback.

pub mod correlator;
pub mod error;
pub mod http;
pub mod release;

pub use correlator::{DispatchOutcome, WorkflowCorrelator, WorkflowTask};
pub use error::WorkflowError;
pub use http::HttpWorkflowEngine;
pub use release::{MilestoneReleaseManager, ReleaseRepositories};
