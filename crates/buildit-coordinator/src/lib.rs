//! Build task lifecycle for the BuildIt build coordinator.
//!
//! Builds are submitted through [`BuildCoordinator`], tracked in the
//! [`RunningTaskSet`] (one build per configuration at a time) and, once they
//! finish or fail, handed to [`QueueProcessor`]s through the
//! [`BuildTaskQueue`] for persistence and completion.

pub mod coordinator;
pub mod processor;
pub mod queue;
pub mod running;
pub mod task;

pub use coordinator::{BuildCoordinator, BuildHandle, CoordinatorContext};
pub use processor::QueueProcessor;
pub use queue::{BuildTaskQueue, QueuedTask, TaskOutcome};
pub use running::RunningTaskSet;
pub use task::{BuildTask, TaskContext};
