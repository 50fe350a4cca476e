//! Advisory write-through of instance lifecycle events to the platform store.
//!
//! Records may lag behind the cluster or be missing entirely; the orchestrator never
//! reads them back and never fails an operation because a write failed.

use crate::date_time::DateTime;
use crate::types::Status;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// One row per (candidate, challenge)
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub candidate_id: String,
    pub challenge_id: String,
    pub instance_id: String,
    pub status: Status,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl InstanceRecord {
    pub fn new(candidate_id: &str, challenge_id: &str, instance_id: &str, status: Status) -> Self {
        let now = DateTime::now();
        Self {
            candidate_id: candidate_id.to_string(),
            challenge_id: challenge_id.to_string(),
            instance_id: instance_id.to_string(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait InstanceRecordSink: Send + Sync {
    /// Insert or update the row of the record's (candidate, challenge) pair
    async fn upsert(&self, record: InstanceRecord) -> anyhow::Result<()>;
}

/// Sink for deployments without an instance table
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRecordSink;

#[async_trait]
impl InstanceRecordSink for NoopRecordSink {
    async fn upsert(&self, _record: InstanceRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps records in memory, the first `created_at` of a pair is preserved
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<HashMap<(String, String), InstanceRecord>>,
}

impl MemoryRecordSink {
    pub fn get(&self, candidate_id: &str, challenge_id: &str) -> Option<InstanceRecord> {
        self.lock()
            .get(&(candidate_id.to_string(), challenge_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), InstanceRecord>> {
        // a poisoned map still holds valid records
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InstanceRecordSink for MemoryRecordSink {
    async fn upsert(&self, mut record: InstanceRecord) -> anyhow::Result<()> {
        let key = (record.candidate_id.clone(), record.challenge_id.clone());
        let mut records = self.lock();
        if let Some(existing) = records.get(&key) {
            record.created_at = existing.created_at;
        }
        records.insert(key, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_keeps_created_at() {
        let sink = MemoryRecordSink::default();
        let mut first = InstanceRecord::new("cand", "chal", "ctf-a-chal", Status::Pending);
        first.created_at = DateTime::parse("2026-01-01T00:00:00Z").unwrap();
        sink.upsert(first).await.unwrap();

        sink.upsert(InstanceRecord::new("cand", "chal", "ctf-a-chal", Status::Running))
            .await
            .unwrap();

        let stored = sink.get("cand", "chal").unwrap();
        assert_eq!(stored.status, Status::Running);
        assert_eq!(stored.created_at.to_string(), "2026-01-01T00:00:00Z");
        assert!(stored.updated_at > stored.created_at);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        let record = InstanceRecord::new("cand", "chal", "ns", Status::Stopped);
        assert!(NoopRecordSink.upsert(record).await.is_ok());
    }
}
