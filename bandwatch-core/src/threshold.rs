//! Classification of routine measurements against the contracted rate.

use bandwatch_model::ThresholdStatus;
use serde::{Deserialize, Serialize};

/// Contracted rates plus the percentages at which a routine result is
/// considered degraded. A contracted rate of `0` means "not configured".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    pub contracted_download_mbps: f64,
    pub contracted_upload_mbps: f64,
    pub normal_threshold_pct: f64,
    pub critical_threshold_pct: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            contracted_download_mbps: 0.0,
            contracted_upload_mbps: 0.0,
            normal_threshold_pct: 90.0,
            critical_threshold_pct: 50.0,
        }
    }
}

/// Outcome of [`ThresholdPolicy::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub download_pct: Option<f64>,
    pub upload_pct: Option<f64>,
    pub download_status: ThresholdStatus,
    pub upload_status: ThresholdStatus,
    pub overall: ThresholdStatus,
}

impl ThresholdCheck {
    pub fn is_breached(&self) -> bool {
        self.overall.is_breached()
    }
}

impl ThresholdPolicy {
    pub fn evaluate(&self, download_mbps: f64, upload_mbps: f64) -> ThresholdCheck {
        let download_pct = percentage(download_mbps, self.contracted_download_mbps);
        let upload_pct = percentage(upload_mbps, self.contracted_upload_mbps);
        let download_status = self.classify(download_pct);
        let upload_status = self.classify(upload_pct);

        ThresholdCheck {
            download_pct,
            upload_pct,
            download_status,
            upload_status,
            overall: worst(download_status, upload_status),
        }
    }

    fn classify(&self, pct: Option<f64>) -> ThresholdStatus {
        match pct {
            None => ThresholdStatus::Unknown,
            Some(pct) if pct >= self.normal_threshold_pct => ThresholdStatus::Good,
            Some(pct) if pct >= self.critical_threshold_pct => ThresholdStatus::Warning,
            Some(_) => ThresholdStatus::Critical,
        }
    }
}

fn percentage(measured: f64, contracted: f64) -> Option<f64> {
    (contracted > 0.0 && measured.is_finite()).then(|| measured / contracted * 100.0)
}

// Unknown never masks a known result.
fn worst(a: ThresholdStatus, b: ThresholdStatus) -> ThresholdStatus {
    a.max(b)
}
