//! Deterministic in-process [`BrowserSession`] used by the driver and
//! orchestrator tests.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{
    AutomationError, AutomationResult, BrowserLauncher, BrowserSession, LaunchOptions,
    Locator, Visibility,
};

/// What the fake page looks like and how it misbehaves.
#[derive(Clone, Debug, Default)]
pub struct PageScript {
    /// Rendered locators (by `Display`) that exist and are visible.
    pub present: HashSet<String>,
    /// Locators whose click fails even though they are present.
    pub broken_clicks: HashSet<String>,
    /// Locators that never disappear when waited on as hidden.
    pub sticky: HashSet<String>,
    pub navigate_error: bool,
    /// Time navigation takes before it resolves.
    pub navigate_delay: Duration,
    pub screenshot_error: bool,
    pub snapshot_error: bool,
    /// Bytes delivered by the export download.
    pub download: Option<Vec<u8>>,
    pub metadata: Option<serde_json::Value>,
    pub launch_error: bool,
    pub launch_delay: Duration,
}

impl PageScript {
    pub fn with_present(mut self, locator: &Locator) -> Self {
        self.present.insert(locator.to_string());
        self
    }

    pub fn with_broken_click(mut self, locator: &Locator) -> Self {
        self.broken_clicks.insert(locator.to_string());
        self
    }

    pub fn with_sticky(mut self, locator: &Locator) -> Self {
        self.sticky.insert(locator.to_string());
        self
    }

    fn has(&self, locator: &Locator) -> bool {
        self.present.contains(&locator.to_string())
    }
}

#[derive(Debug)]
pub struct ScriptedSession {
    script: PageScript,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSession {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn note(&self, call: String) -> AutomationResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(AutomationError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> AutomationResult<()> {
        self.note(format!("navigate {url}"))?;
        if self.script.navigate_delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(AutomationError::timeout("navigate", timeout));
        }
        tokio::time::sleep(self.script.navigate_delay).await;
        if self.script.navigate_error {
            return Err(AutomationError::Protocol("net::ERR_NAME_NOT_RESOLVED".into()));
        }
        self.note("navigated".to_string())
    }

    async fn exists(&self, locator: &Locator) -> AutomationResult<bool> {
        self.note(format!("exists {locator}"))?;
        Ok(self.script.has(locator))
    }

    async fn wait_for(
        &self,
        locators: &[Locator],
        state: Visibility,
        timeout: Duration,
    ) -> AutomationResult<usize> {
        self.note(format!("wait_for {state:?} {}", locators.len()))?;
        let resolved = locators.iter().position(|locator| match state {
            Visibility::Attached | Visibility::Visible => self.script.has(locator),
            Visibility::Hidden => !self.script.sticky.contains(&locator.to_string()),
        });
        match resolved {
            Some(index) => Ok(index),
            None => {
                tokio::time::sleep(timeout).await;
                Err(AutomationError::timeout("wait_for", timeout))
            }
        }
    }

    async fn click(&self, locator: &Locator, _timeout: Duration) -> AutomationResult<()> {
        self.note(format!("click {locator}"))?;
        if !self.script.has(locator) {
            return Err(AutomationError::not_found(locator));
        }
        if self.script.broken_clicks.contains(&locator.to_string()) {
            return Err(AutomationError::Protocol("element click intercepted".into()));
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> AutomationResult<()> {
        self.note(format!("screenshot {}", path.display()))?;
        if self.script.screenshot_error {
            return Err(AutomationError::Protocol("screenshot failed".into()));
        }
        tokio::fs::write(path, b"\x89PNG").await?;
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> AutomationResult<serde_json::Value> {
        self.note("evaluate".to_string())?;
        self.script
            .metadata
            .clone()
            .ok_or_else(|| AutomationError::Script("metadata table missing".into()))
    }

    async fn wait_for_download(
        &self,
        trigger: &Locator,
        dest: &Path,
        timeout: Duration,
    ) -> AutomationResult<PathBuf> {
        self.click(trigger, timeout).await?;
        match &self.script.download {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(dest.to_path_buf())
            }
            None => {
                tokio::time::sleep(timeout).await;
                Err(AutomationError::timeout("download", timeout))
            }
        }
    }

    async fn page_source(&self) -> AutomationResult<String> {
        self.note("page_source".to_string())?;
        if self.script.snapshot_error {
            return Err(AutomationError::Protocol("target crashed".into()));
        }
        Ok("<html><body><h1>Die Messung ist abgeschlossen.</h1></body></html>".to_string())
    }

    async fn close(&self) -> AutomationResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out [`ScriptedSession`]s and keeps them for inspection.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    script: PageScript,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions
            .lock()
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    pub fn last_session(&self) -> Option<Arc<ScriptedSession>> {
        self.sessions().pop()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _options: &LaunchOptions,
    ) -> AutomationResult<Arc<dyn BrowserSession>> {
        tokio::time::sleep(self.script.launch_delay).await;
        if self.script.launch_error {
            return Err(AutomationError::Launch("chromedriver not reachable".into()));
        }
        let session = Arc::new(ScriptedSession::new(self.script.clone()));
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(session.clone());
        }
        Ok(session)
    }
}
