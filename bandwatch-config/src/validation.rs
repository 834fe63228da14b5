use crate::{models::Config, util::format_duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

/// Checks for combinations that load fine but will misbehave at runtime.
pub fn apply_guard_rails(config: &Config) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();
    let measurement = &config.measurement;

    if measurement.run_timeout < measurement.completion_wait {
        warnings.push_with_hint(
            format!(
                "run timeout ({}) is shorter than the completion wait ({}); runs will be cut off",
                format_duration(measurement.run_timeout),
                format_duration(measurement.completion_wait)
            ),
            "Raise MEASUREMENT_RUN_TIMEOUT above MEASUREMENT_COMPLETION_WAIT",
        );
    }

    if measurement.stuck_timeout < measurement.run_timeout {
        warnings.push_with_hint(
            format!(
                "stuck timeout ({}) is shorter than the run timeout ({}); live runs may be swept",
                format_duration(measurement.stuck_timeout),
                format_duration(measurement.run_timeout)
            ),
            "Set MEASUREMENT_STUCK_TIMEOUT to at least MEASUREMENT_RUN_TIMEOUT",
        );
    }

    let threshold = &measurement.threshold;
    if threshold.critical_threshold_pct > threshold.normal_threshold_pct {
        warnings.push(format!(
            "critical threshold ({}%) is above the normal threshold ({}%)",
            threshold.critical_threshold_pct, threshold.normal_threshold_pct
        ));
    }
    if threshold.contracted_download_mbps <= 0.0 && threshold.contracted_upload_mbps <= 0.0 {
        warnings.push_with_hint(
            "no contracted rate configured; threshold checks will report unknown",
            "Set CONTRACTED_DOWNLOAD_MBPS and CONTRACTED_UPLOAD_MBPS",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "no database configured; measurements are kept in memory only",
            "Set DATABASE_URL",
        );
    }

    warnings
}
