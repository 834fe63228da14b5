use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bandwatch_model::{MeasurementId, MeasurementRecord, MeasurementStatus};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    database::ports::{CompletedMeasurement, MeasurementRepository},
    error::{StorageError, StorageResult},
};

/// Process-local repository with the same transition rules as Postgres.
#[derive(Clone, Default)]
pub struct InMemoryMeasurementRepository {
    records: Arc<Mutex<HashMap<MeasurementId, MeasurementRecord>>>,
}

impl fmt::Debug for InMemoryMeasurementRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryMeasurementRepository");
        match self.records.try_lock() {
            Ok(records) => {
                debug.field("records", &records.len());
            }
            Err(_) => {
                debug.field("records", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryMeasurementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record verbatim, bypassing the single-active check.
    pub async fn insert_raw(&self, record: MeasurementRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn transition<F>(&self, id: MeasurementId, apply: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut MeasurementRecord) -> bool,
    {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if !record.is_active() {
            return Ok(false);
        }
        if apply(record) {
            record.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl MeasurementRepository for InMemoryMeasurementRepository {
    async fn create(&self, record: &MeasurementRecord) -> StorageResult<MeasurementRecord> {
        let mut records = self.records.lock().await;
        if records.values().any(MeasurementRecord::is_active) {
            return Err(StorageError::ActiveConflict);
        }
        records.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn get(&self, id: MeasurementId) -> StorageResult<Option<MeasurementRecord>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn list_recent(&self, limit: u32) -> StorageResult<Vec<MeasurementRecord>> {
        let records = self.records.lock().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all.truncate(limit as usize);
        Ok(all)
    }

    async fn find_active(&self) -> StorageResult<Vec<MeasurementRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|record| record.is_active())
            .cloned()
            .collect())
    }

    async fn mark_running(&self, id: MeasurementId) -> StorageResult<bool> {
        self.transition(id, |record| {
            if record.status != MeasurementStatus::Pending {
                return false;
            }
            record.status = MeasurementStatus::Running;
            true
        })
        .await
    }

    async fn complete(
        &self,
        id: MeasurementId,
        outcome: &CompletedMeasurement,
    ) -> StorageResult<bool> {
        self.transition(id, |record| {
            record.status = MeasurementStatus::Completed;
            record.download_mbps = outcome.values.download;
            record.upload_mbps = outcome.values.upload;
            record.latency_ms = outcome.values.latency;
            record.screenshot_path = outcome.screenshot_path.clone();
            record.export_path = outcome.export_path.clone();
            record.archive_path = outcome.archive_path.clone();
            record.error = None;
            true
        })
        .await
    }

    async fn fail(&self, id: MeasurementId, error: &str) -> StorageResult<bool> {
        self.transition(id, |record| {
            record.status = MeasurementStatus::Failed;
            record.error = Some(error.to_string());
            true
        })
        .await
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        exclude: Option<MeasurementId>,
    ) -> StorageResult<u64> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for record in records.values_mut() {
            if record.is_active() && record.created_at < cutoff && Some(record.id) != exclude {
                record.status = MeasurementStatus::Failed;
                record.error = Some(error.to_string());
                record.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
