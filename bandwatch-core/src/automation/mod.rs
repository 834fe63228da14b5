//! Browser automation contract.
//!
//! The measurement driver only ever talks to a [`BrowserSession`]; how the
//! session is backed (WebDriver, a scripted fake in tests, ...) is decided by
//! whichever [`BrowserLauncher`] the orchestrator was built with.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
pub(crate) mod scripted;
#[cfg(feature = "webdriver")]
pub mod webdriver;

/// How to find one element on the page.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// Plain CSS selector.
    Css { css: String },
    /// CSS selector whose rendered text must contain `text`.
    CssWithText { css: String, text: String },
    /// Any element whose normalized text equals `text`.
    Text { text: String },
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Locator::Css { css: css.into() }
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text { text: text.into() }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { css } => write!(f, "{css}"),
            Locator::CssWithText { css, text } => {
                write!(f, "{css}:has-text(\"{text}\")")
            }
            Locator::Text { text } => write!(f, "text=\"{text}\""),
        }
    }
}

/// Ordered locator strategies; the first one that works wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorChain(Vec<Locator>);

impl LocatorChain {
    pub fn single(locator: Locator) -> Self {
        Self(vec![locator])
    }

    pub fn then(mut self, fallback: Locator) -> Self {
        self.0.push(fallback);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Locator> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Locator] {
        &self.0
    }
}

impl fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" | "))
    }
}

/// Element state a wait resolves on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Attached,
    Visible,
    Hidden,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "Geolocation::default_accuracy")]
    pub accuracy: f64,
}

impl Geolocation {
    const fn default_accuracy() -> f64 {
        100.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Session parameters handed to a [`BrowserLauncher`].
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub headless: bool,
    pub locale: String,
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    /// When set, the geolocation permission is pre-granted with this position.
    pub geolocation: Option<Geolocation>,
    /// Directory the browser saves downloads into.
    pub download_dir: PathBuf,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            locale: "de-DE".to_string(),
            user_agent: None,
            viewport: Viewport::default(),
            geolocation: None,
            download_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("no element matches {locator}")]
    NotFound { locator: String },

    #[error("{action} timed out after {}ms", after.as_millis())]
    Timeout { action: String, after: Duration },

    #[error("browser session is closed")]
    SessionClosed,

    #[error("failed to launch browser session: {0}")]
    Launch(String),

    #[error("automation protocol error: {0}")]
    Protocol(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    pub fn not_found(locator: &Locator) -> Self {
        AutomationError::NotFound {
            locator: locator.to_string(),
        }
    }

    pub fn timeout(action: impl Into<String>, after: Duration) -> Self {
        AutomationError::Timeout {
            action: action.into(),
            after,
        }
    }
}

pub type AutomationResult<T> = std::result::Result<T, AutomationError>;

/// One live browser page.
///
/// `close` must be idempotent and safe to call while another task is in the
/// middle of any other method; calls racing a close fail with
/// [`AutomationError::SessionClosed`] or a protocol error.
#[async_trait]
pub trait BrowserSession: Send + Sync + fmt::Debug {
    /// Load `url` and wait until the network has gone idle.
    async fn navigate(&self, url: &str, timeout: Duration) -> AutomationResult<()>;

    /// Immediate presence check, no waiting.
    async fn exists(&self, locator: &Locator) -> AutomationResult<bool>;

    /// Wait until any of `locators` reaches `state`; returns the index of the
    /// locator that resolved first.
    async fn wait_for(
        &self,
        locators: &[Locator],
        state: Visibility,
        timeout: Duration,
    ) -> AutomationResult<usize>;

    async fn click(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> AutomationResult<()>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> AutomationResult<()>;

    async fn evaluate(&self, script: &str) -> AutomationResult<serde_json::Value>;

    /// Click `trigger`, wait for the resulting file download and move it to
    /// `dest`.
    async fn wait_for_download(
        &self,
        trigger: &Locator,
        dest: &Path,
        timeout: Duration,
    ) -> AutomationResult<PathBuf>;

    /// Serialized markup of the current document.
    async fn page_source(&self) -> AutomationResult<String>;

    async fn close(&self) -> AutomationResult<()>;

    fn is_closed(&self) -> bool;
}

/// Factory for browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync + fmt::Debug {
    async fn launch(
        &self,
        options: &LaunchOptions,
    ) -> AutomationResult<Arc<dyn BrowserSession>>;
}
