//! Drives one official measurement on breitbandmessung.de through a
//! [`BrowserSession`].
//!
//! The protocol is a fixed sequence of steps. Navigation, starting the
//! measurement and capturing the final page snapshot are required; every
//! other step is best-effort and only leaves a trace in the [`RunLog`].

use std::path::{Path, PathBuf};

use bandwatch_model::{MeasurementId, PageMetadata};
use chrono::Utc;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::{
    artifacts::{ArtifactDirs, timestamped_name},
    automation::{AutomationError, BrowserSession, LocatorChain, Visibility},
    measurement::{
        config::DriverConfig,
        run_log::{DriverStep, RunLog, StepOutcome},
    },
};

const COOKIE_DISMISS_PAUSE: std::time::Duration = std::time::Duration::from_millis(500);

/// Run-aborting driver failures.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to load {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: AutomationError,
    },

    #[error("could not start the measurement: {source}")]
    StartMeasurement {
        #[source]
        source: AutomationError,
    },

    #[error("failed to capture page snapshot: {0}")]
    Snapshot(#[source] AutomationError),
}

impl DriverError {
    pub fn step(&self) -> DriverStep {
        match self {
            DriverError::Navigation { .. } => DriverStep::Navigate,
            DriverError::StartMeasurement { .. } => DriverStep::StartMeasurement,
            DriverError::Snapshot(_) => DriverStep::PageSnapshot,
        }
    }
}

/// The CSV export as saved on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub raw: Vec<u8>,
}

impl ExportArtifact {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

#[derive(Clone, Debug)]
pub struct DriverOutput {
    pub export: Option<ExportArtifact>,
    /// Every checkpoint screenshot that was written, in protocol order.
    pub screenshots: Vec<PathBuf>,
    pub result_screenshot: Option<PathBuf>,
    pub page_snapshot: PathBuf,
    pub page_metadata: PageMetadata,
    pub run_log: RunLog,
}

#[derive(Clone, Debug)]
pub struct MeasurementDriver {
    config: DriverConfig,
    artifacts: ArtifactDirs,
}

/// Per-run bookkeeping shared by the step helpers.
struct Run<'a> {
    id: MeasurementId,
    session: &'a dyn BrowserSession,
    log: RunLog,
    screenshots: Vec<PathBuf>,
}

impl Run<'_> {
    fn record(&mut self, step: DriverStep, started: Instant, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Done => {
                info!(target: "measurement::driver", measurement_id = %self.id, step = %step, "step done");
            }
            StepOutcome::Skipped { reason } => {
                info!(target: "measurement::driver", measurement_id = %self.id, step = %step, reason = %reason, "step skipped");
            }
            StepOutcome::SoftFailure { error } => {
                warn!(target: "measurement::driver", measurement_id = %self.id, step = %step, error = %error, "best-effort step failed");
            }
            StepOutcome::HardFailure { error } => {
                error!(target: "measurement::driver", measurement_id = %self.id, step = %step, error = %error, "required step failed");
            }
        }
        self.log.record(step, outcome, started.elapsed());
    }

    /// Best-effort full-page capture; returns the path only when written.
    async fn checkpoint(
        &mut self,
        step: DriverStep,
        dir: &Path,
        prefix: &str,
    ) -> Option<PathBuf> {
        let started = Instant::now();
        let path = dir.join(timestamped_name(prefix, "png", Utc::now()));
        match self.session.screenshot(&path, true).await {
            Ok(()) => {
                debug!(target: "measurement::driver", path = %path.display(), "screenshot saved");
                self.screenshots.push(path.clone());
                self.record(step, started, StepOutcome::Done);
                Some(path)
            }
            Err(err) => {
                self.record(step, started, StepOutcome::soft(err));
                None
            }
        }
    }

    async fn present(
        &self,
        chain: &LocatorChain,
    ) -> Result<Option<usize>, AutomationError> {
        for (index, locator) in chain.iter().enumerate() {
            if self.session.exists(locator).await? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

impl MeasurementDriver {
    pub fn new(config: DriverConfig, artifacts: ArtifactDirs) -> Self {
        Self { config, artifacts }
    }

    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        id: MeasurementId,
    ) -> Result<DriverOutput, DriverError> {
        let timings = self.config.timings;
        let site = &self.config.site;
        let mut run = Run {
            id,
            session,
            log: RunLog::new(),
            screenshots: Vec::new(),
        };

        // 1. Target page, fully loaded.
        let started = Instant::now();
        if let Err(source) = session
            .navigate(&self.config.target_url, timings.navigation)
            .await
        {
            run.record(
                DriverStep::Navigate,
                started,
                StepOutcome::HardFailure {
                    error: source.to_string(),
                },
            );
            return Err(DriverError::Navigation {
                url: self.config.target_url.clone(),
                source,
            });
        }
        sleep(timings.post_navigation_settle).await;
        run.record(DriverStep::Navigate, started, StepOutcome::Done);

        // 2.
        run.checkpoint(
            DriverStep::InitialScreenshot,
            &self.artifacts.screenshots,
            "01_initial_page",
        )
        .await;

        // 3. The cookie banner blocks every other click.
        let started = Instant::now();
        let outcome = match run.present(&site.cookie_banner).await {
            Ok(Some(_)) => match self.click_chain(session, &site.cookie_accept, timings.cookie_click).await {
                Ok(()) => {
                    sleep(COOKIE_DISMISS_PAUSE).await;
                    StepOutcome::Done
                }
                Err(err) => StepOutcome::soft(err),
            },
            Ok(None) => StepOutcome::skipped("cookie banner not shown"),
            Err(err) => StepOutcome::soft(err),
        };
        run.record(DriverStep::CookieConsent, started, outcome);

        // 4. Resolves on its own once geolocation is granted.
        let started = Instant::now();
        let outcome = match run.present(&site.geolocation_modal).await {
            Ok(Some(_)) => match session
                .wait_for(
                    site.geolocation_modal.as_slice(),
                    Visibility::Hidden,
                    timings.geolocation_modal,
                )
                .await
            {
                Ok(_) => StepOutcome::Done,
                Err(err) => StepOutcome::soft(err),
            },
            Ok(None) => StepOutcome::skipped("geolocation modal not shown"),
            Err(err) => StepOutcome::soft(err),
        };
        run.record(DriverStep::GeolocationModal, started, outcome);

        // 5.
        run.checkpoint(
            DriverStep::ModalsScreenshot,
            &self.artifacts.screenshots,
            "02_after_modals",
        )
        .await;

        // 6. Primary locator waits for visibility, fallbacks are clicked directly.
        let started = Instant::now();
        if let Err(source) = self.start_measurement(session).await {
            run.record(
                DriverStep::StartMeasurement,
                started,
                StepOutcome::HardFailure {
                    error: source.to_string(),
                },
            );
            return Err(DriverError::StartMeasurement { source });
        }
        run.record(DriverStep::StartMeasurement, started, StepOutcome::Done);

        // 7.
        sleep(timings.pre_consent_pause).await;
        let started = Instant::now();
        let outcome = match run.present(&site.consent_modal).await {
            Ok(Some(_)) => {
                run.checkpoint(
                    DriverStep::PrivacyConsent,
                    &self.artifacts.screenshots,
                    "03_consent_modal",
                )
                .await;
                match self.wait_and_click(session, &site.consent_accept, timings.consent_click).await {
                    Ok(()) => StepOutcome::Done,
                    Err(err) => StepOutcome::soft(err),
                }
            }
            Ok(None) => StepOutcome::skipped("privacy consent modal not shown"),
            Err(err) => StepOutcome::soft(err),
        };
        run.record(DriverStep::PrivacyConsent, started, outcome);

        // 8.
        sleep(timings.running_pause).await;
        run.checkpoint(
            DriverStep::RunningScreenshot,
            &self.artifacts.screenshots,
            "04_measurement_running",
        )
        .await;

        // 9. A missing indicator still lets us capture whatever is shown.
        let started = Instant::now();
        let outcome = match session
            .wait_for(
                site.completion_indicator.as_slice(),
                Visibility::Visible,
                timings.completion_wait,
            )
            .await
        {
            Ok(_) => {
                sleep(timings.post_completion_settle).await;
                StepOutcome::Done
            }
            Err(err) => StepOutcome::soft(err),
        };
        run.record(DriverStep::AwaitCompletion, started, outcome);

        // 10.
        let result_screenshot = run
            .checkpoint(
                DriverStep::ResultScreenshot,
                &self.artifacts.screenshots,
                "05_measurement_result",
            )
            .await;

        // 11.
        let started = Instant::now();
        let (export, outcome) = self.export_csv(&run).await;
        run.record(DriverStep::ExportCsv, started, outcome);

        // 12.
        let started = Instant::now();
        let (page_metadata, outcome) = match session.evaluate(&site.metadata_script).await {
            Ok(value) => match serde_json::from_value::<PageMetadata>(value) {
                Ok(metadata) if metadata.is_empty() => {
                    (metadata, StepOutcome::skipped("no metadata on page"))
                }
                Ok(metadata) => (metadata, StepOutcome::Done),
                Err(err) => (PageMetadata::default(), StepOutcome::soft(err)),
            },
            Err(err) => (PageMetadata::default(), StepOutcome::soft(err)),
        };
        run.record(DriverStep::PageMetadata, started, outcome);

        // 13. Required by the archive.
        let started = Instant::now();
        let page_snapshot = match self.snapshot(session).await {
            Ok(path) => path,
            Err(source) => {
                run.record(
                    DriverStep::PageSnapshot,
                    started,
                    StepOutcome::HardFailure {
                        error: source.to_string(),
                    },
                );
                return Err(DriverError::Snapshot(source));
            }
        };
        run.record(DriverStep::PageSnapshot, started, StepOutcome::Done);

        info!(
            target: "measurement::driver",
            measurement_id = %id,
            screenshots = run.screenshots.len(),
            export = export.is_some(),
            soft_failures = run.log.soft_failures().count(),
            "measurement protocol finished"
        );

        Ok(DriverOutput {
            export,
            screenshots: run.screenshots,
            result_screenshot,
            page_snapshot,
            page_metadata,
            run_log: run.log,
        })
    }

    async fn start_measurement(&self, session: &dyn BrowserSession) -> Result<(), AutomationError> {
        let timeout = self.config.timings.start_button;
        let mut locators = self.config.site.start_button.iter();
        let Some(primary) = locators.next() else {
            return Err(AutomationError::Protocol("no start locator configured".into()));
        };

        let primary_result = match session
            .wait_for(std::slice::from_ref(primary), Visibility::Visible, timeout)
            .await
        {
            Ok(_) => session.click(primary, timeout).await,
            Err(err) => Err(err),
        };

        let mut last_error = match primary_result {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        for fallback in locators {
            warn!(
                target: "measurement::driver",
                error = %last_error,
                fallback = %fallback,
                "start locator failed, trying fallback"
            );
            match session.click(fallback, timeout).await {
                Ok(()) => return Ok(()),
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }

    /// Click the first locator in `chain` that accepts the click.
    async fn click_chain(
        &self,
        session: &dyn BrowserSession,
        chain: &LocatorChain,
        timeout: std::time::Duration,
    ) -> Result<(), AutomationError> {
        let mut last_error = None;
        for locator in chain.iter() {
            match session.click(locator, timeout).await {
                Ok(()) => return Ok(()),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| AutomationError::Protocol("empty locator chain".into())))
    }

    async fn wait_and_click(
        &self,
        session: &dyn BrowserSession,
        chain: &LocatorChain,
        timeout: std::time::Duration,
    ) -> Result<(), AutomationError> {
        let index = session
            .wait_for(chain.as_slice(), Visibility::Visible, timeout)
            .await?;
        match chain.as_slice().get(index) {
            Some(locator) => session.click(locator, timeout).await,
            None => self.click_chain(session, chain, timeout).await,
        }
    }

    async fn export_csv(&self, run: &Run<'_>) -> (Option<ExportArtifact>, StepOutcome) {
        let link = match run.present(&self.config.site.export_link).await {
            Ok(Some(index)) => match self.config.site.export_link.as_slice().get(index) {
                Some(locator) => locator.clone(),
                None => return (None, StepOutcome::skipped("export link not found")),
            },
            Ok(None) => return (None, StepOutcome::skipped("export link not found")),
            Err(err) => return (None, StepOutcome::soft(err)),
        };

        let dest = self
            .artifacts
            .data
            .join(timestamped_name("messung", "csv", Utc::now()));
        let saved = match run
            .session
            .wait_for_download(&link, &dest, self.config.timings.export_download)
            .await
        {
            Ok(path) => path,
            Err(err) => return (None, StepOutcome::soft(err)),
        };

        match tokio::fs::read(&saved).await {
            Ok(raw) => {
                debug!(
                    target: "measurement::driver",
                    path = %saved.display(),
                    bytes = raw.len(),
                    "csv export saved"
                );
                (Some(ExportArtifact { path: saved, raw }), StepOutcome::Done)
            }
            Err(err) => (None, StepOutcome::soft(err)),
        }
    }

    async fn snapshot(&self, session: &dyn BrowserSession) -> Result<PathBuf, AutomationError> {
        let html = session.page_source().await?;
        let path = self
            .artifacts
            .data
            .join(timestamped_name("page", "html", Utc::now()));
        tokio::fs::write(&path, html).await?;
        Ok(path)
    }
}
