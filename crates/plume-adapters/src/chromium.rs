//! Headless Chromium sessions authenticated with a captured cookie jar.

use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use plume_core::{Identity, CANONICAL_HOST};
use plume_storage::{CookieJar, SessionCookie};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{ExtractError, FeedSession, SessionProvider};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    pub cookies_path: PathBuf,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            cookies_path: PathBuf::from("./session/cookies.json"),
            headless: true,
            executable: None,
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ChromiumSessionProvider {
    config: ChromiumConfig,
}

impl ChromiumSessionProvider {
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig, ExtractError> {
        let mut builder = BrowserConfig::builder().no_sandbox().window_size(1280, 2200);
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.config.executable {
            builder = builder.chrome_executable(executable);
        }
        builder.build().map_err(ExtractError::Browser)
    }

    async fn session_cookies(&self, identity: &Identity) -> Result<Vec<CookieParam>, ExtractError> {
        let session_error = |reason: String| ExtractError::Session {
            handle: identity.handle.clone(),
            reason,
        };
        let jar = CookieJar::load(&self.config.cookies_path)
            .await
            .map_err(|err| session_error(format!("{err:#}")))?;
        let valid = jar.valid_for(CANONICAL_HOST, Utc::now());
        if valid.is_empty() {
            return Err(session_error(format!(
                "no unexpired {CANONICAL_HOST} cookies in {}",
                self.config.cookies_path.display()
            )));
        }
        debug!(total = jar.len(), usable = valid.len(), "session cookies loaded");
        valid.iter().map(cookie_param).collect::<Result<_, _>>().map_err(session_error)
    }

    async fn prepare_page(&self, browser: &Browser, identity: &Identity, cookies: Vec<CookieParam>) -> Result<Page, ExtractError> {
        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        page.set_cookies(cookies).await.map_err(browser_err)?;
        let url = identity.feed_url();
        match tokio::time::timeout(self.config.navigation_timeout, page.goto(url.as_str())).await {
            Ok(Ok(_)) => Ok(page),
            Ok(Err(err)) => {
                let _ = page.close().await;
                Err(browser_err(err))
            }
            Err(_) => {
                let _ = page.close().await;
                Err(ExtractError::Browser(format!("navigation to {url} timed out")))
            }
        }
    }
}

fn cookie_param(cookie: &SessionCookie) -> Result<CookieParam, String> {
    CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only)
        .build()
}

fn browser_err(err: impl Display) -> ExtractError {
    ExtractError::Browser(err.to_string())
}

#[async_trait]
impl SessionProvider for ChromiumSessionProvider {
    async fn open(&self, identity: &Identity) -> Result<Box<dyn FeedSession>, ExtractError> {
        let cookies = self.session_cookies(identity).await?;
        let (mut browser, mut handler) = Browser::launch(self.browser_config()?)
            .await
            .map_err(browser_err)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        match self.prepare_page(&browser, identity, cookies).await {
            Ok(page) => {
                info!(handle = %identity.handle, "feed session opened");
                Ok(Box::new(ChromiumSession {
                    handle: identity.handle.clone(),
                    browser,
                    page,
                    handler_task,
                }))
            }
            Err(err) => {
                shutdown(&mut browser, handler_task).await;
                Err(err)
            }
        }
    }
}

async fn shutdown(browser: &mut Browser, handler_task: JoinHandle<()>) {
    if let Err(err) = browser.close().await {
        warn!(error = %err, "closing browser failed");
    }
    if let Err(err) = browser.wait().await {
        warn!(error = %err, "waiting for browser exit failed");
    }
    handler_task.abort();
}

pub struct ChromiumSession {
    handle: String,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl FeedSession for ChromiumSession {
    async fn wait_for_feed(&mut self, selector: &str, timeout: Duration) -> Result<(), ExtractError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ExtractError::RenderTimeout {
                    handle: self.handle.clone(),
                    timeout,
                });
            }
            if let Ok(Ok(_)) = tokio::time::timeout(remaining, self.page.find_element(selector)).await {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn scroll_by(&mut self, pixels: u32) -> Result<(), ExtractError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {pixels})"))
            .await
            .map_err(browser_err)?;
        Ok(())
    }

    async fn count_items(&mut self, selector: &str) -> Result<usize, ExtractError> {
        let quoted = serde_json::to_string(selector).map_err(browser_err)?;
        self.page
            .evaluate(format!("document.querySelectorAll({quoted}).length"))
            .await
            .map_err(browser_err)?
            .into_value::<usize>()
            .map_err(browser_err)
    }

    async fn snapshot_html(&mut self) -> Result<String, ExtractError> {
        self.page.content().await.map_err(browser_err)
    }

    async fn close(self: Box<Self>) -> Result<(), ExtractError> {
        let ChromiumSession {
            handle,
            mut browser,
            page,
            handler_task,
        } = *self;
        if let Err(err) = page.close().await {
            warn!(error = %err, "closing page failed");
        }
        shutdown(&mut browser, handler_task).await;
        debug!(%handle, "feed session closed");
        Ok(())
    }
}
