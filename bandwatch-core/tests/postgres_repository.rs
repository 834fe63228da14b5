#![cfg(feature = "database")]

use anyhow::Result;
use bandwatch_core::{
    database::{CompletedMeasurement, MeasurementRepository, PostgresMeasurementRepository},
    error::StorageError,
};
use bandwatch_model::{
    ExtractedResult, MeasurementId, MeasurementRecord, MeasurementStatus, TriggerReason,
};
use chrono::{Duration, DurationRound, Utc};
use sqlx::PgPool;
use std::path::PathBuf;

fn pending(reason: TriggerReason, result_id: Option<i64>, age: Duration) -> MeasurementRecord {
    // Postgres keeps microseconds.
    let created = (Utc::now() - age)
        .duration_trunc(Duration::microseconds(1))
        .expect("truncate timestamp");
    MeasurementRecord::pending(MeasurementId::new(), reason, result_id, created)
}

#[sqlx::test(migrator = "bandwatch_core::MIGRATOR")]
async fn create_preserves_trigger_fields(pool: PgPool) -> Result<()> {
    let repo = PostgresMeasurementRepository::new(pool);
    let record = pending(TriggerReason::ThresholdCritical, Some(4711), Duration::zero());

    let stored = repo.create(&record).await?;
    assert_eq!(stored, record);

    let fetched = repo.get(record.id).await?.expect("record exists");
    assert_eq!(fetched.trigger_reason, TriggerReason::ThresholdCritical);
    assert_eq!(fetched.trigger_result_id, Some(4711));
    assert_eq!(fetched.status, MeasurementStatus::Pending);
    Ok(())
}

#[sqlx::test(migrator = "bandwatch_core::MIGRATOR")]
async fn unique_index_allows_one_active_record(pool: PgPool) -> Result<()> {
    let repo = PostgresMeasurementRepository::new(pool);
    repo.create(&pending(TriggerReason::Manual, None, Duration::zero()))
        .await?;

    let err = repo
        .create(&pending(TriggerReason::Manual, None, Duration::zero()))
        .await
        .expect_err("second active record must be rejected");
    assert!(matches!(err, StorageError::ActiveConflict));
    assert_eq!(repo.list_recent(10).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "bandwatch_core::MIGRATOR")]
async fn lifecycle_transitions_are_monotonic(pool: PgPool) -> Result<()> {
    let repo = PostgresMeasurementRepository::new(pool);
    let record = repo
        .create(&pending(TriggerReason::Manual, None, Duration::zero()))
        .await?;

    assert!(repo.mark_running(record.id).await?);
    let outcome = CompletedMeasurement {
        values: ExtractedResult {
            download: Some(123.4),
            upload: None,
            latency: Some(18.0),
        },
        screenshot_path: Some(PathBuf::from("/data/screenshots/05.png")),
        export_path: None,
        archive_path: Some(PathBuf::from("/data/zips/measurement.zip")),
    };
    assert!(repo.complete(record.id, &outcome).await?);
    assert!(!repo.fail(record.id, "late failure").await?);

    let stored = repo.get(record.id).await?.expect("record exists");
    assert_eq!(stored.status, MeasurementStatus::Completed);
    assert_eq!(stored.download_mbps, Some(123.4));
    assert_eq!(stored.upload_mbps, None);
    assert_eq!(stored.archive_path, outcome.archive_path);
    assert_eq!(stored.error, None);

    // The slot is free again once the record is terminal.
    repo.create(&pending(TriggerReason::Manual, None, Duration::zero()))
        .await?;
    Ok(())
}

#[sqlx::test(migrator = "bandwatch_core::MIGRATOR")]
async fn fail_stale_is_idempotent(pool: PgPool) -> Result<()> {
    let repo = PostgresMeasurementRepository::new(pool);
    let stale = repo
        .create(&pending(TriggerReason::Manual, None, Duration::minutes(30)))
        .await?;
    repo.mark_running(stale.id).await?;

    let cutoff = Utc::now() - Duration::minutes(10);
    let message = "Measurement timed out (restart or stuck process)";
    assert_eq!(repo.fail_stale(cutoff, message, None).await?, 1);
    assert_eq!(repo.fail_stale(cutoff, message, None).await?, 0);

    let stored = repo.get(stale.id).await?.expect("record exists");
    assert_eq!(stored.status, MeasurementStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some(message));
    assert!(repo.find_active().await?.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "bandwatch_core::MIGRATOR")]
async fn fail_stale_skips_excluded_record(pool: PgPool) -> Result<()> {
    let repo = PostgresMeasurementRepository::new(pool);
    let current = repo
        .create(&pending(TriggerReason::Manual, None, Duration::minutes(30)))
        .await?;

    let cutoff = Utc::now() - Duration::minutes(10);
    assert_eq!(repo.fail_stale(cutoff, "stale", Some(current.id)).await?, 0);
    assert_eq!(repo.find_active().await?.len(), 1);
    Ok(())
}
