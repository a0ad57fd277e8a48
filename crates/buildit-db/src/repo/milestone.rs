//! Product milestone repository.

use async_trait::async_trait;
use buildit_core::ResourceId;
use buildit_core::release::ProductMilestone;

use crate::DbResult;
use crate::memory::MemTable;

#[async_trait]
pub trait MilestoneRepo: Send + Sync {
    async fn save(&self, milestone: ProductMilestone) -> DbResult<ProductMilestone>;
    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductMilestone>>;
}

/// In-memory implementation of MilestoneRepo.
pub struct MemMilestoneRepo {
    table: MemTable<ProductMilestone>,
}

impl MemMilestoneRepo {
    pub fn new() -> Self {
        Self {
            table: MemTable::new(),
        }
    }
}

impl Default for MemMilestoneRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MilestoneRepo for MemMilestoneRepo {
    async fn save(&self, milestone: ProductMilestone) -> DbResult<ProductMilestone> {
        Ok(self.table.upsert(milestone.id, milestone))
    }

    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductMilestone>> {
        Ok(self.table.get(id))
    }
}
