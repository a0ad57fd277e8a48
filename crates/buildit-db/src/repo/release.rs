//! Milestone release repository.

use async_trait::async_trait;
use buildit_core::ResourceId;
use buildit_core::release::ProductMilestoneRelease;

use crate::DbResult;
use crate::memory::MemTable;

#[async_trait]
pub trait ReleaseRepo: Send + Sync {
    async fn save(&self, release: ProductMilestoneRelease) -> DbResult<ProductMilestoneRelease>;
    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductMilestoneRelease>>;
    /// Most recently started release of a milestone.
    async fn find_latest_by_milestone(
        &self,
        milestone_id: ResourceId,
    ) -> DbResult<Option<ProductMilestoneRelease>>;
}

/// In-memory implementation of ReleaseRepo.
pub struct MemReleaseRepo {
    table: MemTable<ProductMilestoneRelease>,
}

impl MemReleaseRepo {
    pub fn new() -> Self {
        Self {
            table: MemTable::new(),
        }
    }
}

impl Default for MemReleaseRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReleaseRepo for MemReleaseRepo {
    async fn save(&self, release: ProductMilestoneRelease) -> DbResult<ProductMilestoneRelease> {
        Ok(self.table.upsert(release.id, release))
    }

    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<ProductMilestoneRelease>> {
        Ok(self.table.get(id))
    }

    async fn find_latest_by_milestone(
        &self,
        milestone_id: ResourceId,
    ) -> DbResult<Option<ProductMilestoneRelease>> {
        // Ids are UUIDv7, so the largest id breaks ties between equal start times.
        Ok(self
            .table
            .filter(|r| r.milestone_id == milestone_id)
            .into_iter()
            .max_by(|a, b| {
                a.starting_date
                    .cmp(&b.starting_date)
                    .then_with(|| a.id.cmp(&b.id))
            }))
    }
}
