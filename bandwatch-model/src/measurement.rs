use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{error::ModelError, ids::MeasurementId};

/// Why an official measurement was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TriggerReason {
    Manual,
    ThresholdWarning,
    ThresholdCritical,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Manual => "manual",
            TriggerReason::ThresholdWarning => "threshold_warning",
            TriggerReason::ThresholdCritical => "threshold_critical",
        }
    }

    pub fn is_threshold(&self) -> bool {
        !matches!(self, TriggerReason::Manual)
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerReason {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(TriggerReason::Manual),
            "threshold_warning" => Ok(TriggerReason::ThresholdWarning),
            "threshold_critical" => Ok(TriggerReason::ThresholdCritical),
            _ => Err(ModelError::UnknownTriggerReason(s.to_string())),
        }
    }
}

/// Lifecycle of a measurement record: `pending → running → completed|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MeasurementStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl MeasurementStatus {
    pub const ACTIVE: [MeasurementStatus; 2] =
        [MeasurementStatus::Pending, MeasurementStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementStatus::Pending => "pending",
            MeasurementStatus::Running => "running",
            MeasurementStatus::Completed => "completed",
            MeasurementStatus::Failed => "failed",
        }
    }

    /// Pending and running records hold the single-flight slot.
    pub fn is_active(&self) -> bool {
        matches!(self, MeasurementStatus::Pending | MeasurementStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(MeasurementStatus::Pending),
            "running" => Ok(MeasurementStatus::Running),
            "completed" => Ok(MeasurementStatus::Completed),
            "failed" => Ok(MeasurementStatus::Failed),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// One persisted official measurement attempt.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementRecord {
    pub id: MeasurementId,
    pub trigger_reason: TriggerReason,
    /// Weak reference to the routine result that tripped a threshold.
    pub trigger_result_id: Option<i64>,
    pub status: MeasurementStatus,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub screenshot_path: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeasurementRecord {
    /// Fresh `pending` record for a newly accepted trigger.
    pub fn pending(
        id: MeasurementId,
        trigger_reason: TriggerReason,
        trigger_result_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            trigger_reason,
            trigger_result_id,
            status: MeasurementStatus::Pending,
            download_mbps: None,
            upload_mbps: None,
            latency_ms: None,
            screenshot_path: None,
            export_path: None,
            archive_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn values(&self) -> ExtractedResult {
        ExtractedResult {
            download: self.download_mbps,
            upload: self.upload_mbps,
            latency: self.latency_ms,
        }
    }
}

/// Values pulled out of the site's CSV export. Any field may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractedResult {
    pub download: Option<f64>,
    pub upload: Option<f64>,
    pub latency: Option<f64>,
}

impl ExtractedResult {
    pub fn is_empty(&self) -> bool {
        self.download.is_none() && self.upload.is_none() && self.latency.is_none()
    }
}

/// Identification strings scraped from the result page, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct PageMetadata {
    pub date: Option<String>,
    pub time: Option<String>,
    pub test_id: Option<String>,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.time.is_none() && self.test_id.is_none()
    }
}
