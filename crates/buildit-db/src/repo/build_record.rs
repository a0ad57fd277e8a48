//! Build record repository.

use async_trait::async_trait;
use buildit_core::ResourceId;
use buildit_core::build::BuildRecord;

use crate::DbResult;
use crate::memory::MemTable;

#[async_trait]
pub trait BuildRecordRepo: Send + Sync {
    async fn save(&self, record: BuildRecord) -> DbResult<BuildRecord>;
    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<BuildRecord>>;
    /// Records of one build configuration, newest first.
    async fn list_by_configuration(
        &self,
        configuration_id: ResourceId,
    ) -> DbResult<Vec<BuildRecord>>;
}

/// In-memory implementation of BuildRecordRepo.
pub struct MemBuildRecordRepo {
    table: MemTable<BuildRecord>,
}

impl MemBuildRecordRepo {
    pub fn new() -> Self {
        Self {
            table: MemTable::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemBuildRecordRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildRecordRepo for MemBuildRecordRepo {
    async fn save(&self, record: BuildRecord) -> DbResult<BuildRecord> {
        Ok(self.table.upsert(record.id, record))
    }

    async fn find_by_id(&self, id: ResourceId) -> DbResult<Option<BuildRecord>> {
        Ok(self.table.get(id))
    }

    async fn list_by_configuration(
        &self,
        configuration_id: ResourceId,
    ) -> DbResult<Vec<BuildRecord>> {
        let mut records = self.table.filter(|r| r.configuration_id == configuration_id);
        records.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::{Operation, State, TaskStatus};
    use chrono::{Duration, Utc};
    use std::collections::HashMap;

    fn make_record(configuration_id: ResourceId, minutes_ago: i64) -> BuildRecord {
        let ended_at = Utc::now() - Duration::minutes(minutes_ago);
        BuildRecord {
            id: ResourceId::new(),
            configuration_id,
            configuration_name: "proj-1".to_string(),
            scm_repo_url: "https://git.example.com/proj-1.git".to_string(),
            scm_revision: Some("main".to_string()),
            status: TaskStatus::new(Operation::CollectResults, State::Completed),
            submitted_at: ended_at,
            ended_at,
            log: String::new(),
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = MemBuildRecordRepo::new();
        let record = make_record(ResourceId::new(), 0);
        let id = record.id;

        repo.save(record).await.unwrap();
        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.configuration_name, "proj-1");
        assert!(repo.find_by_id(ResourceId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_attributes() {
        let repo = MemBuildRecordRepo::new();
        let mut record = repo.save(make_record(ResourceId::new(), 0)).await.unwrap();

        record.put_attribute("brewId", "42");
        repo.save(record.clone()).await.unwrap();

        let found = repo.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(found.attributes.get("brewId").map(String::as_str), Some("42"));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_configuration_newest_first() {
        let repo = MemBuildRecordRepo::new();
        let configuration_id = ResourceId::new();
        let older = repo.save(make_record(configuration_id, 10)).await.unwrap();
        let newer = repo.save(make_record(configuration_id, 1)).await.unwrap();
        repo.save(make_record(ResourceId::new(), 0)).await.unwrap();

        let records = repo.list_by_configuration(configuration_id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, newer.id);
        assert_eq!(records[1].id, older.id);
    }
}
