use std::fmt;

use crate::measurement::TriggerReason;

/// Classification of a routine measurement against the contracted rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ThresholdStatus {
    Unknown,
    Good,
    Warning,
    Critical,
}

impl ThresholdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdStatus::Unknown => "unknown",
            ThresholdStatus::Good => "good",
            ThresholdStatus::Warning => "warning",
            ThresholdStatus::Critical => "critical",
        }
    }

    pub fn is_breached(&self) -> bool {
        matches!(self, ThresholdStatus::Warning | ThresholdStatus::Critical)
    }

    /// Trigger reason for an official measurement, if this status warrants one.
    pub fn trigger_reason(&self) -> Option<TriggerReason> {
        match self {
            ThresholdStatus::Warning => Some(TriggerReason::ThresholdWarning),
            ThresholdStatus::Critical => Some(TriggerReason::ThresholdCritical),
            ThresholdStatus::Good | ThresholdStatus::Unknown => None,
        }
    }
}

impl fmt::Display for ThresholdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
