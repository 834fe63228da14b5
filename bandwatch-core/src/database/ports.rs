use std::path::PathBuf;

use async_trait::async_trait;
use bandwatch_model::{ExtractedResult, MeasurementId, MeasurementRecord};
use chrono::{DateTime, Utc};

use crate::error::StorageResult;

/// Payload for the `running → completed` transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedMeasurement {
    pub values: ExtractedResult,
    pub screenshot_path: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
}

/// Storage port for measurement records.
///
/// Transition methods are conditional: they only touch records that are still
/// `pending` or `running` and report whether a row changed, so a terminal
/// record can never be overwritten by a late writer.
#[async_trait]
pub trait MeasurementRepository: Send + Sync + std::fmt::Debug {
    /// Persist a freshly built `pending` record. Fails with
    /// [`StorageError::ActiveConflict`](crate::error::StorageError::ActiveConflict)
    /// when another active record exists.
    async fn create(&self, record: &MeasurementRecord) -> StorageResult<MeasurementRecord>;

    async fn get(&self, id: MeasurementId) -> StorageResult<Option<MeasurementRecord>>;

    /// Most recent first.
    async fn list_recent(&self, limit: u32) -> StorageResult<Vec<MeasurementRecord>>;

    /// Every record still `pending` or `running`.
    async fn find_active(&self) -> StorageResult<Vec<MeasurementRecord>>;

    /// `pending → running`.
    async fn mark_running(&self, id: MeasurementId) -> StorageResult<bool>;

    /// `pending|running → completed`.
    async fn complete(
        &self,
        id: MeasurementId,
        outcome: &CompletedMeasurement,
    ) -> StorageResult<bool>;

    /// `pending|running → failed`.
    async fn fail(&self, id: MeasurementId, error: &str) -> StorageResult<bool>;

    /// Force every active record created before `cutoff` to `failed`, skipping
    /// `exclude`. Returns the number of records changed.
    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        exclude: Option<MeasurementId>,
    ) -> StorageResult<u64>;
}
