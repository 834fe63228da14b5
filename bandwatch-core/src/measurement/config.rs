//! Knobs for the measurement driver and orchestrator.

use std::time::Duration;

use crate::{
    artifacts::ArtifactDirs,
    automation::{LaunchOptions, Locator, LocatorChain},
    extract::HeaderVocabulary,
};

pub const DEFAULT_TARGET_URL: &str = "https://breitbandmessung.de/test";

/// Per-step bounds used by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverTimings {
    pub navigation: Duration,
    /// Pause after navigation so late scripts can render.
    pub post_navigation_settle: Duration,
    pub cookie_click: Duration,
    /// How long the geolocation modal may take to resolve on its own.
    pub geolocation_modal: Duration,
    pub start_button: Duration,
    /// Pause for the consent modal animation.
    pub pre_consent_pause: Duration,
    pub consent_click: Duration,
    pub running_pause: Duration,
    /// Upper bound for the measurement itself.
    pub completion_wait: Duration,
    pub post_completion_settle: Duration,
    pub export_download: Duration,
}

impl Default for DriverTimings {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            post_navigation_settle: Duration::from_secs(2),
            cookie_click: Duration::from_secs(5),
            geolocation_modal: Duration::from_secs(15),
            start_button: Duration::from_secs(10),
            pre_consent_pause: Duration::from_millis(1_500),
            consent_click: Duration::from_secs(5),
            running_pause: Duration::from_secs(3),
            completion_wait: Duration::from_secs(240),
            post_completion_settle: Duration::from_secs(2),
            export_download: Duration::from_secs(15),
        }
    }
}

/// Locators for every element the driver interacts with. Each chain is tried
/// in order.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteProfile {
    pub cookie_banner: LocatorChain,
    pub cookie_accept: LocatorChain,
    pub geolocation_modal: LocatorChain,
    pub start_button: LocatorChain,
    pub consent_modal: LocatorChain,
    pub consent_accept: LocatorChain,
    pub completion_indicator: LocatorChain,
    pub export_link: LocatorChain,
    /// Script returning `{date, time, testId}` for the finished run.
    pub metadata_script: String,
}

const METADATA_SCRIPT: &str = r#"
const times = document.querySelectorAll('time');
const date = times[0] ? times[0].textContent.trim() : null;
const time = times[1] ? times[1].textContent.replace(' Uhr', '').trim() : null;
let testId = null;
for (const cell of document.querySelectorAll('.more-info td')) {
  const text = (cell.textContent || '').trim();
  if (text.length > 50 && /^[a-f0-9]+$/.test(text)) {
    testId = text;
    break;
  }
}
return { date: date || null, time: time || null, testId: testId };
"#;

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            cookie_banner: LocatorChain::single(Locator::css("#cookie-banner")),
            cookie_accept: LocatorChain::single(Locator::with_text(
                "button",
                "Alle Cookies zulassen",
            )),
            geolocation_modal: LocatorChain::single(Locator::with_text(
                ".modal",
                "Zugriff erlauben",
            )),
            start_button: LocatorChain::single(Locator::with_text(
                "button.btn-primary",
                "Browsermessung starten",
            ))
            .then(Locator::with_text("button.btn-primary", "starten")),
            consent_modal: LocatorChain::single(Locator::css(".modal.show")),
            consent_accept: LocatorChain::single(Locator::with_text(
                ".modal.show button",
                "Akzeptieren",
            )),
            completion_indicator: LocatorChain::single(Locator::with_text(
                "h1",
                "Die Messung ist abgeschlossen",
            )),
            export_link: LocatorChain::single(Locator::text("Ergebnis exportieren (csv)")),
            metadata_script: METADATA_SCRIPT.to_string(),
        }
    }
}

/// Everything the driver needs for one run.
#[derive(Clone, Debug, Default)]
pub struct DriverConfig {
    pub target_url: String,
    pub timings: DriverTimings,
    pub site: SiteProfile,
}

impl DriverConfig {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Self::default()
        }
    }
}

/// Orchestrator-level settings.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Active records older than this are swept to `failed`.
    pub stuck_timeout: Duration,
    /// Hard deadline for session launch plus the driver run.
    pub run_timeout: Duration,
    pub driver: DriverConfig,
    pub launch: LaunchOptions,
    pub artifacts: ArtifactDirs,
    pub vocabulary: HeaderVocabulary,
}

impl OrchestratorSettings {
    pub fn new(artifacts: ArtifactDirs) -> Self {
        let launch = LaunchOptions {
            download_dir: artifacts.data.clone(),
            ..LaunchOptions::default()
        };
        Self {
            stuck_timeout: Duration::from_secs(600),
            run_timeout: Duration::from_secs(600),
            driver: DriverConfig::new(DEFAULT_TARGET_URL),
            launch,
            artifacts,
            vocabulary: HeaderVocabulary::default(),
        }
    }
}
