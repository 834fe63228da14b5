//! [`BrowserSession`] over the W3C WebDriver wire protocol.
//!
//! Targets chromedriver (or a Selenium grid with Chrome nodes). Full-page
//! screenshots, geolocation overrides and permission grants go through the
//! `goog/cdp/execute` extension since plain WebDriver has no equivalent.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    AutomationError, AutomationResult, BrowserLauncher, BrowserSession, Geolocation,
    LaunchOptions, Locator, Visibility,
};

/// Key under which W3C element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a6e3-4a4e-8fe9-ab7b3aa3e0e5";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Quiet period after which the network is considered idle.
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);
const PARTIAL_DOWNLOAD_SUFFIXES: [&str; 3] = [".crdownload", ".tmp", ".part"];

const RESOURCE_COUNT_SCRIPT: &str =
    "return performance.getEntriesByType('resource').length + ':' + document.readyState;";

fn transport(err: reqwest::Error) -> AutomationError {
    AutomationError::Protocol(format!("webdriver transport: {err}"))
}

/// Starts chromedriver sessions.
#[derive(Clone)]
pub struct WebDriverLauncher {
    client: Client,
    endpoint: Url,
}

impl fmt::Debug for WebDriverLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverLauncher")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl WebDriverLauncher {
    pub fn new(endpoint: Url) -> AutomationResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, mut endpoint: Url) -> Self {
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn capabilities(options: &LaunchOptions) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!(
                "--window-size={},{}",
                options.viewport.width, options.viewport.height
            ),
            format!("--lang={}", options.locale),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(agent) = &options.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        // Chrome silently ignores a relative download directory.
        let download_dir = std::path::absolute(&options.download_dir)
            .unwrap_or_else(|_| options.download_dir.clone());

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.to_string_lossy(),
                            "download.prompt_for_download": false,
                            "intl.accept_languages": options.locale,
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, options: &LaunchOptions) -> AutomationResult<Arc<dyn BrowserSession>> {
        let url = self
            .endpoint
            .join("session")
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .json(&Self::capabilities(options))
            .send()
            .await
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        if let Some(error) = wire_error(&body) {
            return Err(AutomationError::Launch(error));
        }
        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| AutomationError::Launch("response carried no sessionId".into()))?
            .to_string();

        let session_url = self
            .endpoint
            .join(&format!("session/{session_id}"))
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        let base = self
            .endpoint
            .join(&format!("session/{session_id}/"))
            .map_err(|err| AutomationError::Launch(err.to_string()))?;
        let session = WebDriverSession {
            client: self.client.clone(),
            session_url,
            base,
            session_id,
            download_dir: options.download_dir.clone(),
            closed: AtomicBool::new(false),
        };
        info!(
            target: "measurement::webdriver",
            session_id = %session.session_id,
            headless = options.headless,
            "webdriver session started"
        );

        if let Some(geo) = options.geolocation
            && let Err(err) = session.grant_geolocation(geo).await
        {
            let _ = session.close().await;
            return Err(AutomationError::Launch(format!(
                "could not set geolocation: {err}"
            )));
        }

        Ok(Arc::new(session))
    }
}

pub struct WebDriverSession {
    client: Client,
    session_url: Url,
    /// `session_url` with a trailing slash, for joining command paths.
    base: Url,
    session_id: String,
    download_dir: PathBuf,
    closed: AtomicBool,
}

impl fmt::Debug for WebDriverSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverSession")
            .field("session_id", &self.session_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// `"<error>: <message>"` when the body is a WebDriver error response.
fn wire_error(body: &Value) -> Option<String> {
    let value = body.get("value")?;
    let error = value.get("error")?.as_str()?;
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    Some(format!("{error}: {message}"))
}

/// Quote `text` as an XPath string literal.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

impl WebDriverSession {
    fn ensure_open(&self) -> AutomationResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AutomationError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> AutomationResult<Value> {
        self.ensure_open()?;
        let url = self
            .base
            .join(path)
            .map_err(|err| AutomationError::Protocol(err.to_string()))?;
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(transport)?;
        let mut payload: Value = response.json().await.map_err(transport)?;
        if let Some(error) = wire_error(&payload) {
            self.ensure_open()?;
            return Err(AutomationError::Protocol(error));
        }
        Ok(payload.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }

    async fn grant_geolocation(&self, geo: Geolocation) -> AutomationResult<()> {
        self.cdp(
            "Browser.grantPermissions",
            json!({ "permissions": ["geolocation"] }),
        )
        .await?;
        self.cdp(
            "Emulation.setGeolocationOverride",
            json!({
                "latitude": geo.latitude,
                "longitude": geo.longitude,
                "accuracy": geo.accuracy,
            }),
        )
        .await?;
        Ok(())
    }

    async fn cdp(&self, cmd: &str, params: Value) -> AutomationResult<Value> {
        self.command(
            Method::POST,
            "goog/cdp/execute",
            Some(json!({ "cmd": cmd, "params": params })),
        )
        .await
    }

    async fn find(&self, using: &str, value: &str) -> AutomationResult<Vec<String>> {
        let found = self
            .command(
                Method::POST,
                "elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        Ok(found
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|element| element.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn text_of(&self, element: &str) -> AutomationResult<String> {
        let text = self
            .command(Method::GET, &format!("element/{element}/text"), None)
            .await?;
        Ok(text.as_str().unwrap_or_default().to_string())
    }

    async fn is_displayed(&self, element: &str) -> AutomationResult<bool> {
        let shown = self
            .command(Method::GET, &format!("element/{element}/displayed"), None)
            .await?;
        Ok(shown.as_bool().unwrap_or(false))
    }

    /// Element references matching `locator`, in document order.
    async fn resolve(&self, locator: &Locator) -> AutomationResult<Vec<String>> {
        match locator {
            Locator::Css { css } => self.find("css selector", css).await,
            Locator::CssWithText { css, text } => {
                let mut matching = Vec::new();
                for element in self.find("css selector", css).await? {
                    if self.text_of(&element).await?.contains(text.as_str()) {
                        matching.push(element);
                    }
                }
                Ok(matching)
            }
            Locator::Text { text } => {
                let xpath = format!("//*[normalize-space(.)={}]", xpath_literal(text));
                let mut found = self.find("xpath", &xpath).await?;
                // Innermost match is the clickable element.
                found.reverse();
                Ok(found)
            }
        }
    }

    async fn first_visible(&self, locator: &Locator) -> AutomationResult<Option<String>> {
        for element in self.resolve(locator).await? {
            if self.is_displayed(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    async fn reached(&self, locator: &Locator, state: Visibility) -> AutomationResult<bool> {
        match state {
            Visibility::Attached => Ok(!self.resolve(locator).await?.is_empty()),
            Visibility::Visible => Ok(self.first_visible(locator).await?.is_some()),
            Visibility::Hidden => Ok(self.first_visible(locator).await?.is_none()),
        }
    }

    async fn wait_network_idle(&self, deadline: Instant, timeout: Duration) -> AutomationResult<()> {
        let mut last = String::new();
        let mut stable_since = Instant::now();
        loop {
            let reading = self
                .command(
                    Method::POST,
                    "execute/sync",
                    Some(json!({ "script": RESOURCE_COUNT_SCRIPT, "args": [] })),
                )
                .await?;
            let current = reading.as_str().unwrap_or_default().to_string();
            if current != last {
                last = current;
                stable_since = Instant::now();
            } else if last.ends_with(":complete") && stable_since.elapsed() >= NETWORK_IDLE_WINDOW {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::timeout("network idle", timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn list_downloads(&self) -> AutomationResult<HashSet<PathBuf>> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.insert(entry.path());
        }
        Ok(names)
    }
}

fn is_partial_download(path: &Path) -> bool {
    let name = path.to_string_lossy();
    PARTIAL_DOWNLOAD_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> AutomationResult<()> {
        let deadline = Instant::now() + timeout;
        self.command(
            Method::POST,
            "timeouts",
            Some(json!({ "pageLoad": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) })),
        )
        .await?;
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?;
        self.wait_network_idle(deadline, timeout).await?;
        debug!(target: "measurement::webdriver", url, "navigation finished");
        Ok(())
    }

    async fn exists(&self, locator: &Locator) -> AutomationResult<bool> {
        Ok(!self.resolve(locator).await?.is_empty())
    }

    async fn wait_for(
        &self,
        locators: &[Locator],
        state: Visibility,
        timeout: Duration,
    ) -> AutomationResult<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            for (index, locator) in locators.iter().enumerate() {
                if self.reached(locator, state).await? {
                    return Ok(index);
                }
            }
            if Instant::now() >= deadline {
                let wanted: Vec<String> = locators.iter().map(ToString::to_string).collect();
                return Err(AutomationError::timeout(
                    format!("waiting for {state:?} {}", wanted.join(" | ")),
                    timeout,
                ));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> AutomationResult<()> {
        self.wait_for(std::slice::from_ref(locator), Visibility::Visible, timeout)
            .await
            .map_err(|err| match err {
                AutomationError::Timeout { .. } => AutomationError::not_found(locator),
                other => other,
            })?;
        let element = self
            .first_visible(locator)
            .await?
            .ok_or_else(|| AutomationError::not_found(locator))?;
        self.command(
            Method::POST,
            &format!("element/{element}/click"),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> AutomationResult<()> {
        let encoded = if full_page {
            let shot = self
                .cdp(
                    "Page.captureScreenshot",
                    json!({ "format": "png", "captureBeyondViewport": true }),
                )
                .await?;
            shot.get("data").and_then(Value::as_str).map(str::to_string)
        } else {
            self.command(Method::GET, "screenshot", None)
                .await?
                .as_str()
                .map(str::to_string)
        };
        let encoded =
            encoded.ok_or_else(|| AutomationError::Protocol("screenshot carried no data".into()))?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| AutomationError::Protocol(format!("invalid screenshot data: {err}")))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> AutomationResult<Value> {
        self.command(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": script, "args": [] })),
        )
        .await
        .map_err(|err| match err {
            AutomationError::Protocol(message) => AutomationError::Script(message),
            other => other,
        })
    }

    async fn wait_for_download(
        &self,
        trigger: &Locator,
        dest: &Path,
        timeout: Duration,
    ) -> AutomationResult<PathBuf> {
        let deadline = Instant::now() + timeout;
        let before = self.list_downloads().await?;
        self.click(trigger, timeout).await?;

        loop {
            self.ensure_open()?;
            let fresh = self
                .list_downloads()
                .await?
                .into_iter()
                .find(|path| !before.contains(path) && !is_partial_download(path));
            if let Some(saved) = fresh {
                if tokio::fs::rename(&saved, dest).await.is_err() {
                    tokio::fs::copy(&saved, dest).await?;
                    if let Err(err) = tokio::fs::remove_file(&saved).await {
                        warn!(target: "measurement::webdriver", error = %err, "could not remove downloaded file");
                    }
                }
                debug!(target: "measurement::webdriver", path = %dest.display(), "download saved");
                return Ok(dest.to_path_buf());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::timeout("download", timeout));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn page_source(&self) -> AutomationResult<String> {
        let source = self.command(Method::GET, "source", None).await?;
        source
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AutomationError::Protocol("page source was not a string".into()))
    }

    async fn close(&self) -> AutomationResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let response = self
            .client
            .delete(self.session_url.clone())
            .send()
            .await
            .map_err(transport)?;
        info!(
            target: "measurement::webdriver",
            session_id = %self.session_id,
            status = %response.status(),
            "webdriver session closed"
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
