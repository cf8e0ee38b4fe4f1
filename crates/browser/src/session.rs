//! Browser process and per-run page sessions.
//!
//! The Chrome process is expensive and is launched once for the lifetime
//! of the monitor. Every pipeline run gets its own tab ([`PageSession`])
//! with a dedicated CDP connection; the tab is closed when the session is
//! dropped, which also covers runs aborted by the time budget.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use slotwatch_core::{Error, PageDriver, Result, SessionFactory};

use crate::cdp::CdpClient;

/// Viewport forced on every session; the monitored site rearranges its
/// form elements on narrow screens.
const VIEWPORT: (i32, i32) = (1680, 1050);

const WAIT_VISIBLE_DEADLINE: Duration = Duration::from_secs(30);
const WAIT_VISIBLE_STEP: Duration = Duration::from_millis(200);

pub struct Browser {
    debug_port: u16,
    /// Browser-endpoint connection, used for target create/close.
    cdp: Arc<CdpClient>,
    child: Child,
}

impl Browser {
    /// Launch a headless Chrome/Chromium with a dedicated profile
    /// directory and connect to its DevTools endpoint.
    pub async fn launch(profile_dir: PathBuf) -> Result<Self> {
        let binary = find_chrome_binary()
            .ok_or_else(|| Error::Driver("no Chrome/Chromium binary found".to_string()))?;

        std::fs::create_dir_all(&profile_dir)?;
        let debug_port = find_free_port().await?;
        let args = build_chrome_args(debug_port, &profile_dir);

        info!(binary = %binary, port = debug_port, "Launching browser");

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Driver(format!("launch {}: {}", binary, e)))?;

        let browser_ws = wait_for_devtools_ready(debug_port, Duration::from_secs(15)).await?;
        let cdp = Arc::new(CdpClient::connect(&browser_ws).await?);

        info!(port = debug_port, "Browser ready");

        Ok(Self {
            debug_port,
            cdp,
            child,
        })
    }
}

#[async_trait]
impl SessionFactory for Browser {
    type Session = PageSession;

    async fn open_session(&self) -> Result<PageSession> {
        let target_id = self.cdp.create_target("about:blank").await?;
        let ws_url = resolve_target_ws_url(self.debug_port, &target_id).await?;
        let page = CdpClient::connect(&ws_url).await?;

        page.enable_domain("Page").await?;
        page.enable_domain("Runtime").await?;
        page.enable_domain("DOM").await?;
        page.set_viewport(VIEWPORT.0, VIEWPORT.1).await?;

        debug!(target_id = %target_id, "Opened page session");

        Ok(PageSession {
            cdp: page,
            browser_cdp: self.cdp.clone(),
            target_id,
            closed: false,
        })
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// One tab, scoped to one pipeline run.
pub struct PageSession {
    cdp: CdpClient,
    browser_cdp: Arc<CdpClient>,
    target_id: String,
    closed: bool,
}

impl PageSession {
    /// Close the tab explicitly. Dropping the session closes it too, but
    /// without waiting for the browser to acknowledge.
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.browser_cdp.close_target(&self.target_id).await {
            debug!(error = %e, "closeTarget failed (tab may already be gone)");
        }
    }

    async fn rect_of(&self, selector: &str) -> Result<(f64, f64, f64, f64)> {
        let js = format!(
            concat!(
                "(function() {{ var el = document.querySelector('{}');",
                " if (!el) return null;",
                " el.scrollIntoView({{block: 'center'}});",
                " var r = el.getBoundingClientRect();",
                " return {{x: r.x, y: r.y, w: r.width, h: r.height}}; }})()"
            ),
            escape_selector(selector)
        );
        let val = self.cdp.evaluate_value(&js).await?;
        if val.is_null() {
            return Err(Error::Driver(format!("element not found: {}", selector)));
        }
        let field = |k: &str| val.get(k).and_then(Value::as_f64).unwrap_or(0.0);
        Ok((field("x"), field("y"), field("w"), field("h")))
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // A timed-out run drops us mid-flight; close the tab from a task.
        let browser = self.browser_cdp.clone();
        let target_id = std::mem::take(&mut self.target_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = browser.close_target(&target_id).await;
            });
        }
    }
}

#[async_trait]
impl PageDriver for PageSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.cdp.navigate(url).await?;
        // Give the load a head start; callers poll with wait_visible.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str) -> Result<()> {
        let js = format!(
            concat!(
                "(function() {{ var el = document.querySelector('{}');",
                " if (!el) return false;",
                " var r = el.getBoundingClientRect();",
                " return r.width > 0 && r.height > 0; }})()"
            ),
            escape_selector(selector)
        );

        let start = std::time::Instant::now();
        loop {
            if self.cdp.evaluate_value(&js).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if start.elapsed() > WAIT_VISIBLE_DEADLINE {
                return Err(Error::Timeout(format!(
                    "element '{}' not visible after {}s",
                    selector,
                    WAIT_VISIBLE_DEADLINE.as_secs()
                )));
            }
            tokio::time::sleep(WAIT_VISIBLE_STEP).await;
        }
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        let js = format!(
            "!!document.querySelector('{}')",
            escape_selector(selector)
        );
        Ok(self.cdp.evaluate_value(&js).await?.as_bool() == Some(true))
    }

    async fn capture(&mut self, selector: &str) -> Result<Vec<u8>> {
        let (x, y, w, h) = self.rect_of(selector).await?;
        if w <= 0.0 || h <= 0.0 {
            return Err(Error::Driver(format!(
                "element '{}' has no visible box",
                selector
            )));
        }
        let data = self.cdp.capture_screenshot_clip(x, y, w, h).await?;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::Driver(format!("decode screenshot: {}", e)))
    }

    async fn send_keys(&mut self, selector: &str, text: &str) -> Result<()> {
        let escaped = escape_selector(selector);
        let focus = format!(
            concat!(
                "(function() {{ var el = document.querySelector('{}');",
                " if (!el) return false;",
                " el.focus(); el.value = ''; return true; }})()"
            ),
            escaped
        );
        if self.cdp.evaluate_value(&focus).await?.as_bool() != Some(true) {
            return Err(Error::Driver(format!("element not found: {}", selector)));
        }

        self.cdp.insert_text(text).await?;

        // Frameworks listen for input events, not raw value changes.
        let notify = format!(
            "document.querySelector('{}')?.dispatchEvent(new Event('input', {{bubbles: true}}))",
            escaped
        );
        self.cdp.evaluate_js(&notify).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let js = format!(
            concat!(
                "(function() {{ var el = document.querySelector('{}');",
                " if (!el) return false;",
                " el.scrollIntoView({{block: 'center'}});",
                " el.click(); return true; }})()"
            ),
            escape_selector(selector)
        );
        if self.cdp.evaluate_value(&js).await?.as_bool() != Some(true) {
            return Err(Error::Driver(format!("element not found: {}", selector)));
        }
        Ok(())
    }

    async fn document_html(&mut self) -> Result<String> {
        let val = self
            .cdp
            .evaluate_value("document.documentElement.outerHTML")
            .await?;
        val.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Driver("document markup unavailable".to_string()))
    }
}

fn escape_selector(selector: &str) -> String {
    selector.replace('\\', "\\\\").replace('\'', "\\'")
}

fn build_chrome_args(debug_port: u16, profile_dir: &std::path::Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--headless=new".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
        format!("--window-size={},{}", VIEWPORT.0, VIEWPORT.1),
        "about:blank".to_string(),
    ]
}

/// Find a Chrome or Chromium binary on this machine.
fn find_chrome_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Driver(format!("bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Driver(format!("local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the DevTools endpoint answers, then return its
/// browser-level WebSocket URL.
async fn wait_for_devtools_ready(port: u16, timeout: Duration) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Driver(format!(
                "DevTools endpoint not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its page WebSocket URL via /json/list. The target
/// may take a moment to show up after createTarget.
async fn resolve_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id) {
                if let Some(ws) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws.to_string());
                }
            }
        }
    }

    Err(Error::Driver(format!(
        "no WebSocket URL for target '{}' after retries",
        target_id
    )))
}
