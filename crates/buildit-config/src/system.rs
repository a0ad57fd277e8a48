//! System configuration parsing.
//!
//! ```kdl
//! server {
//!     bind "0.0.0.0:3000"
//!     public-url "https://buildit.example.com"
//! }
//! notifier {
//!     cleanup-interval "1h"
//! }
//! coordinator {
//!     queue-consumers 2
//! }
//! workflow-engine {
//!     url "https://workflow.example.com"
//!     username "buildit"
//!     password "secret"
//!     release-process "milestone-release"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub notifier: NotifierConfig,
    pub coordinator: CoordinatorConfig,
    /// Remote workflow engine; releases are unavailable without it.
    pub workflow_engine: Option<WorkflowEngineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Externally reachable base URL, used to build callback URLs.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// How often disabled clients are swept out.
    pub cleanup_interval: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Number of post-processing consumers on the build task queue.
    pub queue_consumers: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { queue_consumers: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEngineConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Process definition started for milestone releases.
    pub release_process: String,
}

/// Load system configuration from a KDL file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
///
/// Missing sections fall back to their defaults; unknown nodes are ignored.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => config.server = parse_server(node)?,
            "notifier" => config.notifier = parse_notifier(node)?,
            "coordinator" => config.coordinator = parse_coordinator(node)?,
            "workflow-engine" => config.workflow_engine = Some(parse_workflow_engine(node)?),
            _ => {}
        }
    }

    Ok(config)
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let mut server = ServerConfig::default();
    for child in child_nodes(node) {
        match child.name().value() {
            "bind" => {
                server.bind = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("server bind".to_string()))?;
            }
            "public-url" => server.public_url = get_first_string_arg(child),
            _ => {}
        }
    }
    Ok(server)
}

fn parse_notifier(node: &KdlNode) -> ConfigResult<NotifierConfig> {
    let mut notifier = NotifierConfig::default();
    for child in child_nodes(node) {
        if child.name().value() == "cleanup-interval" {
            let raw = get_first_string_arg(child).ok_or_else(|| {
                ConfigError::MissingField("notifier cleanup-interval".to_string())
            })?;
            notifier.cleanup_interval = parse_duration("cleanup-interval", &raw)?;
        }
    }
    Ok(notifier)
}

fn parse_coordinator(node: &KdlNode) -> ConfigResult<CoordinatorConfig> {
    let mut coordinator = CoordinatorConfig::default();
    for child in child_nodes(node) {
        if child.name().value() == "queue-consumers" {
            let count = get_first_int_arg(child).ok_or_else(|| {
                ConfigError::MissingField("coordinator queue-consumers".to_string())
            })?;
            coordinator.queue_consumers = usize::try_from(count)
                .ok()
                .filter(|c| *c > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "queue-consumers".to_string(),
                    message: format!("must be a positive integer, got {}", count),
                })?;
        }
    }
    Ok(coordinator)
}

fn parse_workflow_engine(node: &KdlNode) -> ConfigResult<WorkflowEngineConfig> {
    let mut url = None;
    let mut username = None;
    let mut password = None;
    let mut release_process = None;

    for child in child_nodes(node) {
        match child.name().value() {
            "url" => url = get_first_string_arg(child),
            "username" => username = get_first_string_arg(child),
            "password" => password = get_first_string_arg(child),
            "release-process" => release_process = get_first_string_arg(child),
            _ => {}
        }
    }

    Ok(WorkflowEngineConfig {
        url: url.ok_or_else(|| ConfigError::MissingField("workflow-engine url".to_string()))?,
        username: username.unwrap_or_default(),
        password: password.unwrap_or_default(),
        release_process: release_process.unwrap_or_else(|| "milestone-release".to_string()),
    })
}

/// Parse a duration literal such as `90s`, `30m`, `1h` or `2d`.
pub fn parse_duration(field: &str, raw: &str) -> ConfigResult<Duration> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: field.to_string(),
        message,
    };

    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(format!("missing unit in '{}'", raw)))?;
    let (amount, unit) = raw.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| invalid(format!("invalid number in '{}'", raw)))?;

    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 60 * 60,
        "d" => amount * 60 * 60 * 24,
        _ => return Err(invalid(format!("unknown unit '{}'", unit))),
    };

    if seconds == 0 {
        return Err(invalid("duration must be greater than zero".to_string()));
    }
    Ok(Duration::from_secs(seconds))
}

// Helper functions for extracting values from KDL nodes

fn child_nodes(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|c| c.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}
