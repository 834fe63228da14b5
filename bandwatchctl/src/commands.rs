use std::process::ExitCode;

use anyhow::Context;
use bandwatch_config::Config;
use bandwatch_core::measurement::MeasurementOrchestrator;
use bandwatch_model::{MeasurementId, MeasurementRecord, MeasurementStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{BreachArgs, MeasureArgs};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn measure(
    orchestrator: &MeasurementOrchestrator,
    args: MeasureArgs,
) -> anyhow::Result<ExitCode> {
    let record = orchestrator
        .start_measurement(args.reason, args.result_id)
        .await
        .context("measurement was not started")?;
    follow(orchestrator, record).await
}

pub async fn measure_if_breached(
    orchestrator: &MeasurementOrchestrator,
    config: &Config,
    args: BreachArgs,
) -> anyhow::Result<ExitCode> {
    let check = config
        .measurement
        .threshold
        .evaluate(args.download, args.upload);
    print_json(&check)?;

    if args.dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    match orchestrator
        .start_if_breached(&check, args.result_id)
        .await
        .context("measurement was not started")?
    {
        Some(record) => follow(orchestrator, record).await,
        None => {
            info!(status = %check.overall, "speeds within contract, nothing to do");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Wait for `record` to settle, cancelling on Ctrl-C, then print the final row.
async fn follow(
    orchestrator: &MeasurementOrchestrator,
    record: MeasurementRecord,
) -> anyhow::Result<ExitCode> {
    info!(measurement_id = %record.id, "measurement started, waiting for completion");

    tokio::select! {
        _ = orchestrator.wait_until_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            warn!(measurement_id = %record.id, "interrupted, cancelling measurement");
            orchestrator.cancel_current_measurement().await?;
        }
    }

    let finished = orchestrator
        .get_status(record.id)
        .await?
        .unwrap_or(record);
    print_json(&finished)?;

    Ok(match finished.status {
        MeasurementStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

pub async fn status(
    orchestrator: &MeasurementOrchestrator,
    id: MeasurementId,
) -> anyhow::Result<ExitCode> {
    match orchestrator.get_status(id).await? {
        Some(record) => {
            print_json(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            warn!(measurement_id = %id, "measurement not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn list(orchestrator: &MeasurementOrchestrator, limit: u32) -> anyhow::Result<ExitCode> {
    print_json(&orchestrator.list_recent(limit).await?)?;
    Ok(ExitCode::SUCCESS)
}

/// Startup already swept once; report that count plus anything found now.
pub async fn cleanup(orchestrator: &MeasurementOrchestrator, swept: u64) -> anyhow::Result<ExitCode> {
    let again = orchestrator.cleanup_stuck_measurements().await?;
    print_json(&serde_json::json!({ "failed": swept + again }))?;
    Ok(ExitCode::SUCCESS)
}

pub async fn archive(
    orchestrator: &MeasurementOrchestrator,
    id: MeasurementId,
) -> anyhow::Result<ExitCode> {
    match orchestrator.archive_path(id).await? {
        Some(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            warn!(measurement_id = %id, "no archive available");
            Ok(ExitCode::FAILURE)
        }
    }
}
