use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// The fixed protocol steps, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStep {
    Navigate,
    InitialScreenshot,
    CookieConsent,
    GeolocationModal,
    ModalsScreenshot,
    StartMeasurement,
    PrivacyConsent,
    RunningScreenshot,
    AwaitCompletion,
    ResultScreenshot,
    ExportCsv,
    PageMetadata,
    PageSnapshot,
}

impl DriverStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStep::Navigate => "navigate",
            DriverStep::InitialScreenshot => "initial_screenshot",
            DriverStep::CookieConsent => "cookie_consent",
            DriverStep::GeolocationModal => "geolocation_modal",
            DriverStep::ModalsScreenshot => "modals_screenshot",
            DriverStep::StartMeasurement => "start_measurement",
            DriverStep::PrivacyConsent => "privacy_consent",
            DriverStep::RunningScreenshot => "running_screenshot",
            DriverStep::AwaitCompletion => "await_completion",
            DriverStep::ResultScreenshot => "result_screenshot",
            DriverStep::ExportCsv => "export_csv",
            DriverStep::PageMetadata => "page_metadata",
            DriverStep::PageSnapshot => "page_snapshot",
        }
    }
}

impl fmt::Display for DriverStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    /// Nothing to do, e.g. a modal that never appeared.
    Skipped { reason: String },
    /// Best-effort step failed; the run continued.
    SoftFailure { error: String },
    HardFailure { error: String },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn soft(error: impl fmt::Display) -> Self {
        StepOutcome::SoftFailure {
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepOutcome::SoftFailure { .. } | StepOutcome::HardFailure { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: DriverStep,
    pub outcome: StepOutcome,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

/// Ordered record of what happened at each protocol step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    entries: Vec<StepRecord>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: DriverStep, outcome: StepOutcome, elapsed: Duration) {
        self.entries.push(StepRecord {
            step,
            outcome,
            elapsed,
        });
    }

    pub fn entries(&self) -> &[StepRecord] {
        &self.entries
    }

    pub fn outcome(&self, step: DriverStep) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.step == step)
            .map(|entry| &entry.outcome)
    }

    pub fn soft_failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.outcome, StepOutcome::SoftFailure { .. }))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_outcome_per_step_wins() {
        let mut log = RunLog::new();
        log.record(
            DriverStep::CookieConsent,
            StepOutcome::soft("click intercepted"),
            Duration::from_millis(5),
        );
        log.record(DriverStep::CookieConsent, StepOutcome::Done, Duration::ZERO);
        log.record(
            DriverStep::ExportCsv,
            StepOutcome::skipped("export link not found"),
            Duration::ZERO,
        );

        assert_eq!(log.outcome(DriverStep::CookieConsent), Some(&StepOutcome::Done));
        assert_eq!(log.soft_failures().count(), 1);
        assert!(log.outcome(DriverStep::Navigate).is_none());
    }

    #[test]
    fn serializes_with_tagged_outcomes() {
        let mut log = RunLog::new();
        log.record(
            DriverStep::ResultScreenshot,
            StepOutcome::soft("no page"),
            Duration::from_millis(1_250),
        );
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["entries"][0]["step"], "result_screenshot");
        assert_eq!(json["entries"][0]["outcome"]["outcome"], "soft_failure");
        assert_eq!(json["entries"][0]["elapsed"], 1_250);
    }
}
