//! Headless-browser engine wrapper.
//!
//! One Chromium instance and one shared browsing context serve the whole
//! render session; each route gets its own page (tab). The CDP event
//! handler runs on a dedicated task for the engine's lifetime.

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;

/// Pages whose captured markup is smaller than this are treated as
/// failed renders (a blank document signals a client-side error).
pub const MIN_CONTENT_BYTES: usize = 100;

/// How often the content-readiness condition is re-evaluated.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Extra settle time granted when the readiness wait expires.
const READY_GRACE_DELAY: Duration = Duration::from_millis(500);

/// Readiness probe: length of the app mount element's markup.
const MOUNT_CONTENT_LENGTH_JS: &str =
    "(document.querySelector('#root') || document.querySelector('#app') || document.body).innerHTML.length";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to configure browser: {0}")]
    Config(String),

    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("page did not finish loading within {0:?}")]
    PageTimeout(Duration),

    #[error("page rendered essentially empty ({0} bytes)")]
    EmptyPage(usize),
}

/// A launched headless Chromium plus its CDP handler task.
pub struct BrowserEngine {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl BrowserEngine {
    /// Launch headless Chromium suitable for container use.
    pub async fn launch() -> Result<Self, RenderError> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(RenderError::Config)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    /// Render one URL to static markup.
    ///
    /// Navigation (including network quiescence) is bounded by
    /// `page_timeout`. The content-readiness wait is bounded by
    /// `ready_timeout`; if it expires the page is captured anyway after a
    /// short grace delay rather than failing the route.
    pub async fn render_page(
        &self,
        url: &str,
        page_timeout: Duration,
        ready_timeout: Duration,
    ) -> Result<String, RenderError> {
        let page = tokio::time::timeout(page_timeout, self.open_and_load(url))
            .await
            .map_err(|_| RenderError::PageTimeout(page_timeout))??;

        let result = self.capture(&page, url, ready_timeout).await;
        if let Err(err) = page.close().await {
            tracing::debug!(url, error = %err, "Failed to close page");
        }
        result
    }

    async fn open_and_load(&self, url: &str) -> Result<Page, RenderError> {
        let page = self.browser.new_page(url).await?;
        page.wait_for_navigation().await?;
        Ok(page)
    }

    async fn capture(
        &self,
        page: &Page,
        url: &str,
        ready_timeout: Duration,
    ) -> Result<String, RenderError> {
        let ready = tokio::time::timeout(ready_timeout, self.wait_for_content(page)).await;
        if ready.is_err() {
            // Graceful degradation: capture whatever is there after a
            // final settle delay instead of failing the route.
            tracing::debug!(url, "Content-readiness wait expired, capturing after grace delay");
            tokio::time::sleep(READY_GRACE_DELAY).await;
        }

        let html = page.content().await?;
        if html.len() < MIN_CONTENT_BYTES {
            return Err(RenderError::EmptyPage(html.len()));
        }
        Ok(html)
    }

    /// Poll until the mount element holds non-trivial markup.
    async fn wait_for_content(&self, page: &Page) {
        loop {
            let length = page
                .evaluate(MOUNT_CONTENT_LENGTH_JS)
                .await
                .ok()
                .and_then(|value| value.into_value::<u64>().ok())
                .unwrap_or(0);
            if length as usize >= MIN_CONTENT_BYTES {
                return;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Close the engine process. Must be called even on error paths.
    pub async fn shutdown(mut self) {
        if let Err(err) = self.browser.close().await {
            tracing::debug!(error = %err, "Browser close failed");
        }
        if let Err(err) = self.browser.wait().await {
            tracing::debug!(error = %err, "Browser wait failed");
        }
        self.handler_task.abort();
    }
}
