//! Storage layer for the BuildIt build coordinator.
//!
//! Provides repository traits and in-memory implementations. Repositories are
//! only called outside the coordinator's structural locks: after a build task
//! leaves the queue, or after a correlated workflow event is applied.

pub mod error;
mod memory;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;
