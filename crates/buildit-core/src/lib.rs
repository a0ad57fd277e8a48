//! Core domain types and traits for the BuildIt build coordinator.
//!
//! This crate contains:
//! - Resource identifiers and build identities
//! - Task status and the lifecycle state machine
//! - Build configuration and result types
//! - Collaborator traits: build drivers, notification clients, workflow engines
//! - Milestone release types

pub mod build;
pub mod driver;
pub mod error;
pub mod id;
pub mod notification;
pub mod release;
pub mod status;
pub mod workflow;

pub use error::{Error, Result};
pub use id::{BuildIdentity, CorrelationId, ResourceId};
pub use status::{Operation, State, TaskStatus};
