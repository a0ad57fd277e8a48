//! HTTP client for the remote workflow engine.

use async_trait::async_trait;
use buildit_config::WorkflowEngineConfig;
use buildit_core::build::BuildResult;
use buildit_core::workflow::{
    BuildResultCallback, EngineError, ProcessStartRequest, WorkflowEngine,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::WorkflowError;

/// Workflow engine reached over HTTP with basic auth.
pub struct HttpWorkflowEngine {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartProcessBody<'a> {
    correlation_id: &'a str,
    payload: &'a serde_json::Value,
}

impl HttpWorkflowEngine {
    pub fn new(config: &WorkflowEngineConfig) -> Result<Self, WorkflowError> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(WorkflowError::Config(format!(
                "workflow engine url must be http(s), got '{}'",
                config.url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn process_url(&self, process_id: &str) -> String {
        format!("{}/processes/{}/instances", self.base_url, process_id)
    }

    async fn check(response: reqwest::Response) -> Result<(), EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn start_process(&self, request: &ProcessStartRequest) -> Result<(), EngineError> {
        let url = self.process_url(&request.process_id);
        info!(correlation_id = %request.correlation_id, url = %url, "Starting workflow process");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&StartProcessBody {
                correlation_id: request.correlation_id.as_str(),
                payload: &request.payload,
            })
            .send()
            .await
            .map_err(|e| EngineError::Request(e.to_string()))?;

        Self::check(response).await
    }
}

#[async_trait]
impl BuildResultCallback for HttpWorkflowEngine {
    async fn notify_build_completed(
        &self,
        callback_url: &str,
        result: &BuildResult,
    ) -> Result<(), EngineError> {
        let event = serde_json::to_string(result)
            .map_err(|e| EngineError::Request(format!("cannot encode build result: {}", e)))?;
        debug!(build = %result.identity, callback_url, "Sending build result");

        let response = self
            .client
            .post(callback_url)
            .basic_auth(&self.username, Some(&self.password))
            .form(&[("event", event.as_str())])
            .send()
            .await
            .map_err(|e| EngineError::Request(e.to_string()))?;

        let outcome = Self::check(response).await;
        if let Err(e) = &outcome {
            warn!(build = %result.identity, callback_url, error = %e, "Build result callback rejected");
        }
        outcome
    }
}
