//! Push notification messages and the client transport trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ResourceId;
use crate::release::MilestoneReleaseStatus;
use crate::status::TaskStatus;

/// Topic for build status changes; qualifier is the build configuration id.
pub const BUILD_STATUS_TOPIC: &str = "build-status";
/// Topic for milestone release changes; qualifier is the milestone id.
pub const MILESTONE_RELEASE_TOPIC: &str = "milestone-release";

/// A message pushed to UI clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BuildStatusChanged {
        configuration_id: ResourceId,
        configuration_name: String,
        status: TaskStatus,
    },
    MilestoneReleaseChanged {
        milestone_id: ResourceId,
        status: MilestoneReleaseStatus,
    },
    Message {
        text: String,
    },
}

/// Failure delivering a message to one client.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("client {0} is closed")]
    Closed(String),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    Transport(String),
}

/// A connected notification subscriber.
///
/// All transport details live in the implementation; the notifier only knows
/// whether a client is alive, what it wants, and how to hand it a message.
#[async_trait]
pub trait AttachedClient: Send + Sync {
    fn session_id(&self) -> &str;

    /// False once the client is known to be dead.
    fn is_enabled(&self) -> bool;

    fn is_subscribed(&self, topic: &str, qualifier: &str) -> bool;

    async fn send_message(&self, message: &Notification) -> Result<(), NotificationError>;
}
