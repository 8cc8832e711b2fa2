//! Headless browsing session: owns one browser process and one page for the
//! duration of a chapter scrape, and exposes a session-bound HTTP fetch that
//! shares the page's cleared-challenge cookies.

use crate::config::SessionConfig;
use crate::error::{MangaRipError, Result};
use crate::models::ChapterTarget;
use crate::utils::poll_until;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    GetCookiesParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Titles that mean the anti-automation interstitial has not resolved yet.
const CHALLENGE_MARKERS: &[&str] = &["just a moment", "checking"];

/// Automation-masking tweaks applied before any site script runs.
const STEALTH_INIT_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
    window.chrome = { runtime: {} };
"#;

/// Resolves once the DOM is usable. Deliberately not network-idle: ad and
/// analytics traffic on comic sites never quiesces.
const DOM_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
        }
    })
"#;

/// The chapter page as the browser rendered it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub title: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
}

impl FetchResponse {
    pub fn is_usable(&self) -> bool {
        self.status == 200 && !self.bytes.is_empty()
    }
}

/// Session-bound fetch capability. The Downloader only sees this seam, so it
/// can be exercised against a scripted fake session in tests.
#[async_trait]
pub trait SessionFetch: Send + Sync {
    async fn fetch(&self, url: &str, referer: &str) -> Result<FetchResponse>;
}

pub struct BrowsingSession {
    config: SessionConfig,
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl BrowsingSession {
    /// Launch a browser and prepare one page with a normalized fingerprint.
    pub async fn launch(config: &SessionConfig) -> Result<Self> {
        info!("Launching browser (headless={})", config.headless);

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--lang={}", config.locale));

        if !config.headless {
            builder = builder.with_head();
        }
        for arg in &config.chrome_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder.build().map_err(MangaRipError::config)?;
        let (browser, mut handler) = Browser::launch(browser_config).await?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(SetUserAgentOverrideParams::new(config.user_agent.clone()))
            .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_INIT_SCRIPT,
        ))
        .await?;

        // The raw image fetches ride the same cookie jar the page fills in,
        // with a matching User-Agent.
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config: config.clone(),
            browser,
            handler_task,
            page,
            client,
            jar,
        })
    }

    /// Load the chapter page, wait out any anti-automation challenge, trigger
    /// lazy-loaded content and return the rendered DOM.
    pub async fn open(&self, target: &ChapterTarget) -> Result<RenderedPage> {
        let url = target.chapter_page_url();
        info!("Opening chapter page: {}", url);

        let nav_params = NavigateParams::builder()
            .url(url.clone())
            .build()
            .map_err(|e| MangaRipError::navigation(&url, e))?;
        self.page
            .execute(nav_params)
            .await
            .map_err(|e| MangaRipError::navigation(&url, e.to_string()))?;

        // DOM-ready, bounded by a hard timeout. Expiry is a navigation
        // error, not a silent empty result.
        let ready = tokio::time::timeout(
            Duration::from_secs(self.config.nav_timeout_secs),
            self.page.evaluate(DOM_READY_SCRIPT.to_string()),
        )
        .await;
        match ready {
            Ok(Ok(result)) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => return Err(MangaRipError::navigation(&url, e.to_string())),
            Err(_) => {
                return Err(MangaRipError::navigation(
                    &url,
                    format!("timed out after {}s waiting for DOM ready", self.config.nav_timeout_secs),
                ))
            }
        }

        self.await_challenge().await;

        tokio::time::sleep(Duration::from_millis(self.config.content_settle_ms)).await;
        self.trigger_lazy_load().await;
        self.sync_cookies(&url).await;

        let final_url = self
            .page
            .url()
            .await?
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.clone());
        let title = self.page_title().await;
        let html = self.page.content().await?;

        info!("Page loaded: {} ({} bytes of DOM)", title, html.len());
        Ok(RenderedPage {
            final_url,
            title,
            html,
        })
    }

    /// Poll the title until the interstitial clears. Exhausting the budget is
    /// a warning, not an abort: some challenges resolve invisibly.
    async fn await_challenge(&self) {
        let interval = Duration::from_millis(self.config.challenge_poll_interval_ms);
        let session = self;
        let settled = poll_until(interval, self.config.challenge_max_attempts, || async move {
            let title = session.page_title().await.to_lowercase();
            !CHALLENGE_MARKERS.iter().any(|marker| title.contains(marker))
        })
        .await;

        if settled {
            debug!("Challenge resolved (title: {})", self.page_title().await);
        } else {
            warn!(
                "Challenge wait exhausted after {} attempts, proceeding anyway (title: {})",
                self.config.challenge_max_attempts,
                self.page_title().await
            );
        }
    }

    /// Repeated end-of-document scrolls force deferred image attributes to
    /// populate. Heuristic only; discovery tolerates a partially-loaded DOM.
    async fn trigger_lazy_load(&self) {
        debug!("Scrolling page to load lazy images ({} passes)", self.config.scroll_passes);
        for _ in 0..self.config.scroll_passes {
            if let Err(e) = self
                .page
                .evaluate("window.scrollTo(0, document.body.scrollHeight)".to_string())
                .await
            {
                debug!("Scroll evaluation skipped: {}", e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(self.config.scroll_pause_ms)).await;
        }
        let _ = self.page.evaluate("window.scrollTo(0, 0)".to_string()).await;
        tokio::time::sleep(Duration::from_millis(self.config.scroll_settle_ms)).await;
    }

    /// Mirror the browser's cookies into the reqwest jar so image requests
    /// carry the same cleared-challenge session.
    async fn sync_cookies(&self, page_url: &str) {
        let parsed = match page_url.parse::<reqwest::Url>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Cannot sync cookies, bad page URL {}: {}", page_url, e);
                return;
            }
        };

        let params = GetCookiesParams::builder()
            .urls(vec![page_url.to_string()])
            .build();
        match self.page.execute(params).await {
            Ok(result) => {
                let cookies = &result.result.cookies;
                for cookie in cookies {
                    let cookie_str = format!(
                        "{}={}; Domain={}; Path={}",
                        cookie.name, cookie.value, cookie.domain, cookie.path
                    );
                    self.jar.add_cookie_str(&cookie_str, &parsed);
                }
                debug!("Synced {} cookies into the fetch client", cookies.len());
            }
            Err(e) => warn!("Failed to read browser cookies: {}", e),
        }
    }

    async fn page_title(&self) -> String {
        match self.page.evaluate("document.title".to_string()).await {
            Ok(result) => result.into_value().unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    /// Release the browser process. Must run on every exit path.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        debug!("Browser session closed");
    }
}

#[async_trait]
impl SessionFetch for BrowsingSession {
    /// Raw image fetch carrying the session's cookies and the chapter page as
    /// referrer. A non-200 status is reported in the response, never thrown.
    async fn fetch(&self, url: &str, referer: &str) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .header(header::REFERER, referer)
            .send()
            .await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok(FetchResponse {
            status,
            bytes: bytes.to_vec(),
        })
    }
}
