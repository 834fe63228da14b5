use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub exports: FileExportsConfig,
    #[serde(default)]
    pub browser: FileBrowserConfig,
    #[serde(default)]
    pub measurement: FileMeasurementConfig,
    #[serde(default)]
    pub threshold: FileThresholdConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileExportsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archives: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBrowserConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdriver_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub geolocation: FileGeolocationConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileGeolocationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// Durations are humantime strings such as `"10m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMeasurementConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_wait: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileThresholdConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracted_download_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracted_upload_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_threshold_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_threshold_pct: Option<f64>,
}

/// Environment-derived configuration values, kept as raw strings so the
/// loader can report which variable was malformed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub exports_dir: Option<PathBuf>,
    pub screenshots_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub zips_dir: Option<PathBuf>,
    pub webdriver_url: Option<String>,
    pub headless: Option<String>,
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    pub geo_latitude: Option<String>,
    pub geo_longitude: Option<String>,
    pub geo_accuracy: Option<String>,
    pub target_url: Option<String>,
    pub stuck_timeout: Option<String>,
    pub run_timeout: Option<String>,
    pub completion_wait: Option<String>,
    pub contracted_download_mbps: Option<String>,
    pub contracted_upload_mbps: Option<String>,
    pub normal_threshold_pct: Option<String>,
    pub critical_threshold_pct: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let path = |key: &str| get(key).map(PathBuf::from);

        Self {
            config_path: path("BANDWATCH_CONFIG"),
            database_url: get("DATABASE_URL"),
            exports_dir: path("EXPORTS_DIR"),
            screenshots_dir: path("SCREENSHOTS_DIR"),
            data_dir: path("DATA_DIR"),
            zips_dir: path("ZIPS_DIR"),
            webdriver_url: get("WEBDRIVER_URL"),
            headless: get("BROWSER_HEADLESS"),
            locale: get("BROWSER_LOCALE"),
            user_agent: get("BROWSER_USER_AGENT"),
            geo_latitude: get("GEO_LATITUDE"),
            geo_longitude: get("GEO_LONGITUDE"),
            geo_accuracy: get("GEO_ACCURACY"),
            target_url: get("MEASUREMENT_TARGET_URL"),
            stuck_timeout: get("MEASUREMENT_STUCK_TIMEOUT"),
            run_timeout: get("MEASUREMENT_RUN_TIMEOUT"),
            completion_wait: get("MEASUREMENT_COMPLETION_WAIT"),
            contracted_download_mbps: get("CONTRACTED_DOWNLOAD_MBPS"),
            contracted_upload_mbps: get("CONTRACTED_UPLOAD_MBPS"),
            normal_threshold_pct: get("THRESHOLD_NORMAL_PCT"),
            critical_threshold_pct: get("THRESHOLD_CRITICAL_PCT"),
        }
    }
}
