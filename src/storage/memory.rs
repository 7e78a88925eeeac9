//! In-process storage backend

use super::{
    filter_keys, AgentField, ChannelStorage, DirectoryStorage, FieldUpdate, RecordPredicate,
    StorageResult,
};
use crate::directory::AgentRecord;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct ChannelLog {
    /// Oldest at the front
    entries: VecDeque<String>,
    appended: u64,
}

/// Maps guarded by async locks; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    agents: RwLock<BTreeMap<String, AgentRecord>>,
    channels: RwLock<HashMap<String, ChannelLog>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DirectoryStorage for MemoryStorage {
    async fn put(&self, record: &AgentRecord) -> StorageResult<bool> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&record.agent_id) {
            return Ok(false);
        }
        agents.insert(record.agent_id.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn exists(&self, agent_id: &str) -> StorageResult<bool> {
        Ok(self.agents.read().await.contains_key(agent_id))
    }

    async fn scan(&self, predicate: RecordPredicate<'_>) -> StorageResult<Vec<AgentRecord>> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .filter(|r| predicate(*r))
            .cloned()
            .collect())
    }

    async fn update_fields(
        &self,
        agent_id: &str,
        fields: &[AgentField],
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate> {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get_mut(agent_id) else {
            return Ok(FieldUpdate::Missing);
        };
        if let Some(guard) = guard {
            if !guard(&*record) {
                return Ok(FieldUpdate::Skipped);
            }
        }
        for field in fields {
            field.apply(record);
        }
        Ok(FieldUpdate::Applied)
    }

    async fn remove(
        &self,
        agent_id: &str,
        guard: Option<RecordPredicate<'_>>,
    ) -> StorageResult<FieldUpdate> {
        let mut agents = self.agents.write().await;
        let Some(record) = agents.get(agent_id) else {
            return Ok(FieldUpdate::Missing);
        };
        if let Some(guard) = guard {
            if !guard(record) {
                return Ok(FieldUpdate::Skipped);
            }
        }
        agents.remove(agent_id);
        Ok(FieldUpdate::Applied)
    }
}

#[async_trait]
impl ChannelStorage for MemoryStorage {
    async fn append(&self, key: &str, payload: &str) -> StorageResult<()> {
        let mut channels = self.channels.write().await;
        let log = channels.entry(key.to_string()).or_default();
        log.entries.push_back(payload.to_string());
        log.appended += 1;
        Ok(())
    }

    async fn trim(&self, key: &str, max_len: usize) -> StorageResult<usize> {
        let mut channels = self.channels.write().await;
        let Some(log) = channels.get_mut(key) else {
            return Ok(0);
        };
        let excess = log.entries.len().saturating_sub(max_len);
        log.entries.drain(..excess);
        Ok(excess)
    }

    async fn range(&self, key: &str, offset: usize, count: usize) -> StorageResult<Vec<String>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(key)
            .map(|log| {
                log.entries
                    .iter()
                    .rev()
                    .skip(offset)
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan_keys(&self, pattern: &str) -> StorageResult<Vec<String>> {
        let keys: Vec<String> = self.channels.read().await.keys().cloned().collect();
        filter_keys(keys, pattern)
    }

    async fn appended_total(&self, key: &str) -> StorageResult<u64> {
        Ok(self
            .channels
            .read()
            .await
            .get(key)
            .map(|log| log.appended)
            .unwrap_or(0))
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::AgentStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_put_rejects_duplicate() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let first = AgentRecord::new("amber-fox-0001", "first", now);
        let second = AgentRecord::new("amber-fox-0001", "second", now);

        assert!(storage.put(&first).await.unwrap());
        assert!(!storage.put(&second).await.unwrap());
        let stored = storage.get("amber-fox-0001").await.unwrap().unwrap();
        assert_eq!(stored.context_summary, "first");
    }

    #[tokio::test]
    async fn test_guarded_update() {
        let storage = MemoryStorage::new();
        let record = AgentRecord::new("amber-fox-0001", "x", Utc::now());
        storage.put(&record).await.unwrap();

        let inactive_only = |r: &AgentRecord| r.status == AgentStatus::Inactive;
        let outcome = storage
            .update_fields(
                "amber-fox-0001",
                &[AgentField::ContextSummary("y".into())],
                Some(&inactive_only),
            )
            .await
            .unwrap();
        assert_eq!(outcome, FieldUpdate::Skipped);

        let outcome = storage
            .update_fields("nobody", &[AgentField::ContextSummary("y".into())], None)
            .await
            .unwrap();
        assert_eq!(outcome, FieldUpdate::Missing);
    }

    #[tokio::test]
    async fn test_trim_keeps_newest_and_counter() {
        let storage = MemoryStorage::new();
        for i in 1..=5 {
            storage.append("public", &format!("m{i}")).await.unwrap();
        }
        assert_eq!(storage.trim("public", 3).await.unwrap(), 2);
        assert_eq!(
            storage.range("public", 0, 10).await.unwrap(),
            vec!["m5", "m4", "m3"]
        );
        assert_eq!(storage.range("public", 1, 1).await.unwrap(), vec!["m4"]);
        assert_eq!(storage.appended_total("public").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_channel_is_empty() {
        let storage = MemoryStorage::new();
        assert!(storage.range("dm:a:b", 0, 10).await.unwrap().is_empty());
        assert_eq!(storage.trim("dm:a:b", 1).await.unwrap(), 0);
        assert_eq!(storage.appended_total("dm:a:b").await.unwrap(), 0);
    }
}
