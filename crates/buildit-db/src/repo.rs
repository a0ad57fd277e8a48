//! Repository traits and implementations.

pub mod artifact;
pub mod build_record;
pub mod milestone;
pub mod product_version;
pub mod release;

pub use artifact::{ArtifactRepo, MemArtifactRepo};
pub use build_record::{BuildRecordRepo, MemBuildRecordRepo};
pub use milestone::{MemMilestoneRepo, MilestoneRepo};
pub use product_version::{MemProductVersionRepo, ProductVersionRepo};
pub use release::{MemReleaseRepo, ReleaseRepo};
