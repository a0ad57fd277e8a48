//! Workflow error types.

use buildit_core::CorrelationId;
use buildit_core::workflow::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to start workflow process {correlation_id}: {source}")]
    Start {
        correlation_id: CorrelationId,
        source: EngineError,
    },

    #[error("invalid workflow engine configuration: {0}")]
    Config(String),
}
