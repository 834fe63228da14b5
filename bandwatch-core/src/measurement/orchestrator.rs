//! Single-flight execution of official measurements.
//!
//! [`MeasurementOrchestrator::start_measurement`] persists a `pending` record
//! and returns it right away; the run itself happens on a background task
//! under a hard deadline. Callers learn the outcome by polling
//! [`MeasurementOrchestrator::get_status`].

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use bandwatch_model::{MeasurementId, MeasurementRecord, TriggerReason};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    archive::{ArchiveBuilder, ArchiveRequest},
    automation::{BrowserLauncher, BrowserSession},
    database::{CompletedMeasurement, MeasurementRepository},
    error::{OrchestratorError, Result, StorageError},
    extract::ResultExtractor,
    measurement::{
        config::OrchestratorSettings,
        driver::{DriverOutput, MeasurementDriver},
    },
    threshold::ThresholdCheck,
};

pub const CANCELLED_MESSAGE: &str = "Measurement cancelled by user";
pub const STUCK_MESSAGE: &str = "Measurement timed out (restart or stuck process)";
const ABANDONED_MESSAGE: &str = "Measurement start was abandoned";

#[derive(Debug, Clone)]
struct ActiveRun {
    id: MeasurementId,
    cancel: CancellationToken,
}

type SessionSlot = tokio::sync::Mutex<Option<(MeasurementId, Arc<dyn BrowserSession>)>>;

/// Single-flight slot held by a start that has not yet spawned its run.
///
/// Dropping it armed (error return, or the caller dropping the start future)
/// frees the slot and fails the record in case its insert already landed.
struct StartGuard {
    inner: Arc<Inner>,
    id: MeasurementId,
    armed: bool,
}

impl StartGuard {
    fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.inner.release(self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            let id = self.id;
            handle.spawn(async move {
                if let Ok(true) = inner.repo.fail(id, ABANDONED_MESSAGE).await {
                    warn!(target: "measurement::orchestrator", measurement_id = %id, "start abandoned after the record was written");
                }
            });
        }
    }
}

/// How the deadline race ended.
enum RunEnd {
    Driven(Box<DriverOutput>),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct Inner {
    repo: Arc<dyn MeasurementRepository>,
    launcher: Arc<dyn BrowserLauncher>,
    settings: OrchestratorSettings,
    driver: MeasurementDriver,
    extractor: ResultExtractor,
    archiver: ArchiveBuilder,
    active: Mutex<Option<ActiveRun>>,
    current: watch::Sender<Option<MeasurementId>>,
    session: SessionSlot,
}

#[derive(Debug, Clone)]
pub struct MeasurementOrchestrator {
    inner: Arc<Inner>,
}

impl MeasurementOrchestrator {
    pub fn new(
        repo: Arc<dyn MeasurementRepository>,
        launcher: Arc<dyn BrowserLauncher>,
        settings: OrchestratorSettings,
    ) -> Self {
        let driver = MeasurementDriver::new(settings.driver.clone(), settings.artifacts.clone());
        let extractor = ResultExtractor::new(settings.vocabulary.clone());
        let archiver = ArchiveBuilder::new(settings.artifacts.archives.clone());
        let (current, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                repo,
                launcher,
                settings,
                driver,
                extractor,
                archiver,
                active: Mutex::new(None),
                current,
                session: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Startup hook: artifact directories plus the stuck-record sweep.
    pub async fn initialize(&self) -> Result<u64> {
        if let Err(err) = self.inner.settings.artifacts.ensure_async().await {
            warn!(
                target: "measurement::orchestrator",
                error = %err,
                "could not create artifact directories"
            );
        }
        self.cleanup_stuck_measurements().await
    }

    pub async fn start_measurement(
        &self,
        trigger_reason: TriggerReason,
        trigger_result_id: Option<i64>,
    ) -> Result<MeasurementRecord> {
        if let Some(result_id) = trigger_result_id
            && result_id <= 0
        {
            return Err(OrchestratorError::InvalidTrigger(format!(
                "trigger result id must be positive, got {result_id}"
            )));
        }

        let id = MeasurementId::new();
        let cancel = CancellationToken::new();
        self.inner.try_acquire(id, cancel.clone())?;
        let guard = StartGuard {
            inner: self.inner.clone(),
            id,
            armed: true,
        };

        let record = self
            .inner
            .persist_pending(id, trigger_reason, trigger_result_id)
            .await?;

        if cancel.is_cancelled() {
            // Cancelled while the record was being written; the cancel found
            // nothing to fail.
            self.inner.persist_failure(id, CANCELLED_MESSAGE).await;
            return Ok(self.inner.repo.get(id).await?.unwrap_or(record));
        }

        info!(
            target: "measurement::orchestrator",
            measurement_id = %id,
            trigger_reason = %trigger_reason,
            trigger_result_id = ?trigger_result_id,
            "official measurement accepted"
        );

        guard.hand_off();
        tokio::spawn(self.inner.clone().execute(id, cancel));
        Ok(record)
    }

    /// Start a threshold-triggered measurement when `check` is breached.
    pub async fn start_if_breached(
        &self,
        check: &ThresholdCheck,
        trigger_result_id: Option<i64>,
    ) -> Result<Option<MeasurementRecord>> {
        let Some(reason) = check.overall.trigger_reason() else {
            debug!(
                target: "measurement::orchestrator",
                status = %check.overall,
                "threshold not breached, no official measurement"
            );
            return Ok(None);
        };
        self.start_measurement(reason, trigger_result_id)
            .await
            .map(Some)
    }

    /// Abort the running measurement. Returns `false` when idle.
    pub async fn cancel_current_measurement(&self) -> Result<bool> {
        let Some(run) = self.inner.active_run() else {
            return Ok(false);
        };

        info!(target: "measurement::orchestrator", measurement_id = %run.id, "cancelling measurement");
        run.cancel.cancel();
        self.inner.close_session(run.id).await;
        let failed = self.inner.repo.fail(run.id, CANCELLED_MESSAGE).await;
        self.inner.release(run.id);
        failed?;
        Ok(true)
    }

    /// Fail every active record older than the stuck timeout, except the one
    /// this instance is running.
    pub async fn cleanup_stuck_measurements(&self) -> Result<u64> {
        self.inner.sweep(self.current_id()).await
    }

    pub fn is_currently_running(&self) -> bool {
        self.inner.active_run().is_some()
    }

    pub fn current_id(&self) -> Option<MeasurementId> {
        self.inner.active_run().map(|run| run.id)
    }

    /// Resolves once no run is in flight.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.current.subscribe();
        let _ = rx.wait_for(Option::is_none).await;
    }

    pub async fn get_status(&self, id: MeasurementId) -> Result<Option<MeasurementRecord>> {
        Ok(self.inner.repo.get(id).await?)
    }

    pub async fn list_recent(&self, limit: u32) -> Result<Vec<MeasurementRecord>> {
        Ok(self.inner.repo.list_recent(limit).await?)
    }

    /// Archive location for a completed record, if the file is still on disk.
    pub async fn archive_path(&self, id: MeasurementId) -> Result<Option<PathBuf>> {
        let Some(path) = self
            .inner
            .repo
            .get(id)
            .await?
            .and_then(|record| record.archive_path)
        else {
            return Ok(None);
        };
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(Some(path)),
            Ok(false) => {
                warn!(target: "measurement::orchestrator", measurement_id = %id, path = %path.display(), "archive missing on disk");
                Ok(None)
            }
            Err(err) => {
                warn!(target: "measurement::orchestrator", measurement_id = %id, error = %err, "could not stat archive");
                Ok(None)
            }
        }
    }
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn active_run(&self) -> Option<ActiveRun> {
        self.lock_active().clone()
    }

    fn try_acquire(&self, id: MeasurementId, cancel: CancellationToken) -> Result<()> {
        let mut active = self.lock_active();
        if let Some(run) = active.as_ref() {
            return Err(OrchestratorError::already_running(Some(run.id)));
        }
        *active = Some(ActiveRun { id, cancel });
        self.current.send_replace(Some(id));
        Ok(())
    }

    /// Clears the guard only if it still belongs to `id`.
    fn release(&self, id: MeasurementId) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
            self.current.send_replace(None);
        }
    }

    fn is_current(&self, id: MeasurementId) -> bool {
        self.lock_active().as_ref().is_some_and(|run| run.id == id)
    }

    async fn sweep(&self, exclude: Option<MeasurementId>) -> Result<u64> {
        let cutoff = stuck_cutoff(Utc::now(), self.settings.stuck_timeout);
        let swept = self.repo.fail_stale(cutoff, STUCK_MESSAGE, exclude).await?;
        if swept > 0 {
            warn!(
                target: "measurement::orchestrator",
                swept,
                "failed stuck measurements"
            );
        }
        Ok(swept)
    }

    async fn persist_pending(
        &self,
        id: MeasurementId,
        reason: TriggerReason,
        result_id: Option<i64>,
    ) -> Result<MeasurementRecord> {
        self.sweep(Some(id)).await?;

        if let Some(active) = self.repo.find_active().await?.into_iter().next() {
            return Err(OrchestratorError::already_running(Some(active.id)));
        }

        let record = MeasurementRecord::pending(id, reason, result_id, Utc::now());
        match self.repo.create(&record).await {
            Ok(record) => Ok(record),
            Err(StorageError::ActiveConflict) => Err(OrchestratorError::already_running(None)),
            Err(err) => Err(err.into()),
        }
    }

    async fn execute(self: Arc<Self>, id: MeasurementId, cancel: CancellationToken) {
        match self.repo.mark_running(id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(target: "measurement::orchestrator", measurement_id = %id, "record no longer pending, run skipped");
                self.persist_failure(id, CANCELLED_MESSAGE).await;
                self.release(id);
                return;
            }
            Err(err) => {
                error!(target: "measurement::orchestrator", measurement_id = %id, error = %err, "could not mark measurement running");
                self.persist_failure(id, &format!("Failed to start measurement: {err}")).await;
                self.release(id);
                return;
            }
        }

        let end = self.clone().race_deadline(id, &cancel).await;
        // The browser is not needed past this point.
        self.close_session(id).await;

        match end {
            RunEnd::Driven(output) => self.finish(id, *output).await,
            RunEnd::Failed(message) => self.persist_failure(id, &message).await,
            RunEnd::Cancelled => {
                debug!(target: "measurement::orchestrator", measurement_id = %id, "run task observed cancellation");
                // No-op when the cancel already failed the record.
                self.persist_failure(id, CANCELLED_MESSAGE).await;
            }
        }

        self.release(id);
    }

    /// Session launch plus the driver run, bounded by the run timeout.
    async fn race_deadline(self: Arc<Self>, id: MeasurementId, cancel: &CancellationToken) -> RunEnd {
        let run_timeout = self.settings.run_timeout;
        let mut work = tokio::spawn(self.clone().launch_and_drive(id, cancel.clone()));

        tokio::select! {
            joined = &mut work => match joined {
                Ok(Ok(output)) => RunEnd::Driven(Box::new(output)),
                Ok(Err(message)) => RunEnd::Failed(message),
                Err(join_err) if join_err.is_panic() => {
                    error!(target: "measurement::orchestrator", measurement_id = %id, "measurement task panicked");
                    RunEnd::Failed("Measurement task panicked".to_string())
                }
                Err(_) => RunEnd::Cancelled,
            },
            _ = tokio::time::sleep(run_timeout) => {
                // A launch still in flight sees the token and closes its session.
                cancel.cancel();
                work.abort();
                error!(
                    target: "measurement::orchestrator",
                    measurement_id = %id,
                    timeout = %humantime::format_duration(run_timeout),
                    "measurement exceeded run timeout"
                );
                RunEnd::Failed(timeout_message(run_timeout))
            }
            _ = cancel.cancelled() => {
                work.abort();
                RunEnd::Cancelled
            }
        }
    }

    async fn launch_and_drive(
        self: Arc<Self>,
        id: MeasurementId,
        cancel: CancellationToken,
    ) -> std::result::Result<DriverOutput, String> {
        // Own task, so aborting the run never strands a browser mid-launch.
        let session = match tokio::spawn(self.clone().launch_session(id, cancel)).await {
            Ok(launched) => launched?,
            Err(err) => return Err(format!("Failed to launch browser: {err}")),
        };

        self.driver
            .run(session.as_ref(), id)
            .await
            .map_err(|err| err.to_string())
    }

    /// Launch and park the session in the slot, or close it right away when
    /// the run ended while the browser was starting.
    async fn launch_session(
        self: Arc<Self>,
        id: MeasurementId,
        cancel: CancellationToken,
    ) -> std::result::Result<Arc<dyn BrowserSession>, String> {
        info!(target: "measurement::orchestrator", measurement_id = %id, "launching browser session");
        let session = self
            .launcher
            .launch(&self.settings.launch)
            .await
            .map_err(|err| format!("Failed to launch browser: {err}"))?;

        let mut slot = self.session.lock().await;
        if cancel.is_cancelled() || !self.is_current(id) {
            drop(slot);
            info!(target: "measurement::orchestrator", measurement_id = %id, "run ended during launch, closing browser");
            if let Err(err) = session.close().await {
                warn!(target: "measurement::orchestrator", measurement_id = %id, error = %err, "closing browser session failed");
            }
            return Err(CANCELLED_MESSAGE.to_string());
        }
        *slot = Some((id, session.clone()));
        Ok(session)
    }

    async fn close_session(&self, id: MeasurementId) {
        let session = {
            let mut slot = self.session.lock().await;
            match slot.as_ref() {
                Some((owner, _)) if *owner == id => slot.take().map(|(_, session)| session),
                _ => None,
            }
        };
        if let Some(session) = session
            && let Err(err) = session.close().await
        {
            warn!(target: "measurement::orchestrator", measurement_id = %id, error = %err, "closing browser session failed");
        }
    }

    async fn finish(&self, id: MeasurementId, output: DriverOutput) {
        let values = match &output.export {
            Some(export) => self.extractor.extract(&export.text()),
            None => {
                warn!(target: "measurement::orchestrator", measurement_id = %id, "no csv export, values unknown");
                Default::default()
            }
        };

        let request = ArchiveRequest {
            id,
            screenshots: output.screenshots.clone(),
            export_file: output.export.as_ref().map(|export| export.path.clone()),
            snapshot_file: output.page_snapshot.clone(),
            values,
            page_metadata: output.page_metadata.clone(),
        };
        let archive_path = match self.archiver.build(request).await {
            Ok(path) => path,
            Err(err) => {
                error!(target: "measurement::orchestrator", measurement_id = %id, error = %err, "archive creation failed");
                self.persist_failure(id, &format!("Archive creation failed: {err}"))
                    .await;
                return;
            }
        };

        let outcome = CompletedMeasurement {
            values,
            screenshot_path: output.result_screenshot.clone(),
            export_path: output.export.map(|export| export.path),
            archive_path: Some(archive_path.clone()),
        };
        match self.repo.complete(id, &outcome).await {
            Ok(true) => info!(
                target: "measurement::orchestrator",
                measurement_id = %id,
                download_mbps = ?values.download,
                upload_mbps = ?values.upload,
                latency_ms = ?values.latency,
                archive = %archive_path.display(),
                "measurement completed"
            ),
            Ok(false) => warn!(
                target: "measurement::orchestrator",
                measurement_id = %id,
                "record already terminal, completion dropped"
            ),
            Err(err) => error!(
                target: "measurement::orchestrator",
                measurement_id = %id,
                error = %err,
                "could not persist completion"
            ),
        }
    }

    async fn persist_failure(&self, id: MeasurementId, message: &str) {
        error!(target: "measurement::orchestrator", measurement_id = %id, error = %message, "measurement failed");
        match self.repo.fail(id, message).await {
            Ok(true) => {}
            Ok(false) => debug!(target: "measurement::orchestrator", measurement_id = %id, "record already terminal"),
            Err(err) => error!(
                target: "measurement::orchestrator",
                measurement_id = %id,
                error = %err,
                "could not persist failure"
            ),
        }
    }
}

fn timeout_message(run_timeout: std::time::Duration) -> String {
    format!(
        "Measurement timed out after {}",
        humantime::format_duration(run_timeout)
    )
}

fn stuck_cutoff(now: DateTime<Utc>, stuck_timeout: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stuck_timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
