//! Product version repository.

use async_trait::async_trait;
use buildit_core::ResourceId;
use buildit_core::release::ProductVersion;

use crate::DbResult;
use crate::memory::MemTable;

#[async_trait]
pub trait ProductVersionRepo: Send + Sync {
    async fn save(&self, version: ProductVersion) -> DbResult<ProductVersion>;
    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductVersion>>;
}

/// In-memory implementation of ProductVersionRepo.
pub struct MemProductVersionRepo {
    table: MemTable<ProductVersion>,
}

impl MemProductVersionRepo {
    pub fn new() -> Self {
        Self {
            table: MemTable::new(),
        }
    }
}

impl Default for MemProductVersionRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductVersionRepo for MemProductVersionRepo {
    async fn save(&self, version: ProductVersion) -> DbResult<ProductVersion> {
        Ok(self.table.upsert(version.id, version))
    }

    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductVersion>> {
        Ok(self.table.get(id))
    }
}
