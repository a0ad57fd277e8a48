//! Remote workflow engine traits and event types.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::build::BuildResult;
use crate::id::CorrelationId;

/// Typed events a remote workflow process delivers back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    #[display("IMPORT_SUCCESS")]
    ImportSuccess,
    #[display("IMPORT_ERROR")]
    ImportError,
    #[display("PROCESS_PROGRESS")]
    ProcessProgress,
}

impl FromStr for EventType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMPORT_SUCCESS" => Ok(EventType::ImportSuccess),
            "IMPORT_ERROR" => Ok(EventType::ImportError),
            "PROCESS_PROGRESS" => Ok(EventType::ProcessProgress),
            other => Err(EngineError::UnknownEventType(other.to_string())),
        }
    }
}

/// Request to start a remote process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStartRequest {
    pub correlation_id: CorrelationId,
    /// Which process definition the engine should run.
    pub process_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("engine rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("workflow engine is not configured")]
    NotConfigured,

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// A remote engine that runs multi-step processes.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Ask the engine to start a process. Results arrive later, out of band.
    async fn start_process(&self, request: &ProcessStartRequest) -> Result<(), EngineError>;
}

/// Receiver of build results for builds submitted with a callback URL.
#[async_trait]
pub trait BuildResultCallback: Send + Sync {
    async fn notify_build_completed(
        &self,
        callback_url: &str,
        result: &BuildResult,
    ) -> Result<(), EngineError>;
}
