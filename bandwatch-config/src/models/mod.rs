pub mod sources;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bandwatch_core::{
    artifacts::ArtifactDirs,
    automation::{Geolocation, LaunchOptions, Viewport},
    measurement::{DriverConfig, OrchestratorSettings},
    threshold::ThresholdPolicy,
};
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub exports: ExportsConfig,
    pub browser: BrowserConfig,
    pub measurement: MeasurementConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Orchestrator settings derived from this configuration.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let artifacts = self.exports.artifact_dirs();
        let mut settings = OrchestratorSettings::new(artifacts.clone());
        settings.stuck_timeout = self.measurement.stuck_timeout;
        settings.run_timeout = self.measurement.run_timeout;

        let mut driver = DriverConfig::new(self.measurement.target_url.clone());
        driver.timings.completion_wait = self.measurement.completion_wait;
        settings.driver = driver;

        settings.launch = LaunchOptions {
            headless: self.browser.headless,
            locale: self.browser.locale.clone(),
            user_agent: self.browser.user_agent.clone(),
            viewport: Viewport::default(),
            geolocation: Some(self.browser.geolocation),
            download_dir: artifacts.data,
        };
        settings
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportsConfig {
    pub root: PathBuf,
    pub screenshots: PathBuf,
    pub data: PathBuf,
    pub archives: PathBuf,
}

impl ExportsConfig {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let dirs = ArtifactDirs::under(root.as_ref());
        Self {
            root: root.as_ref().to_path_buf(),
            screenshots: dirs.screenshots,
            data: dirs.data,
            archives: dirs.archives,
        }
    }

    pub fn artifact_dirs(&self) -> ArtifactDirs {
        ArtifactDirs {
            screenshots: self.screenshots.clone(),
            data: self.data.clone(),
            archives: self.archives.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// WebDriver endpoint (chromedriver or a Selenium grid).
    pub webdriver_url: Url,
    pub headless: bool,
    pub locale: String,
    pub user_agent: Option<String>,
    pub geolocation: Geolocation,
}

#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    pub target_url: String,
    pub stuck_timeout: Duration,
    pub run_timeout: Duration,
    pub completion_wait: Duration,
    pub threshold: ThresholdPolicy,
}

/// Where the effective values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
