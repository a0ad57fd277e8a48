//! Artifact repository.

use async_trait::async_trait;
use buildit_core::ResourceId;
use buildit_core::release::Artifact;

use crate::DbResult;
use crate::memory::MemTable;

#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    async fn save(&self, artifact: Artifact) -> DbResult<Artifact>;
    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<Artifact>>;
}

/// In-memory implementation of ArtifactRepo.
pub struct MemArtifactRepo {
    table: MemTable<Artifact>,
}

impl MemArtifactRepo {
    pub fn new() -> Self {
        Self {
            table: MemTable::new(),
        }
    }
}

impl Default for MemArtifactRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactRepo for MemArtifactRepo {
    async fn save(&self, artifact: Artifact) -> DbResult<Artifact> {
        Ok(self.table.upsert(artifact.id, artifact))
    }

    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<Artifact>> {
        Ok(self.table.get(id))
    }
}
