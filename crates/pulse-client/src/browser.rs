use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use pulse_core::error::AppError;
use pulse_core::models::Metrics;
use pulse_core::traits::{ExtractorFactory, MetricsExtractor};
use tokio::task::JoinHandle;

use crate::parse::parse_metrics;

const TWEET_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

/// Opens headless-Chromium extraction sessions.
///
/// Every session is its own Chromium process, so renewing a session after a
/// block also throws away the old profile, cookies and connection state.
#[derive(Debug, Clone)]
pub struct BrowserExtractorFactory {
    /// Upper bound on waiting for the post to appear.
    load_timeout: Duration,
    /// Extra wait after the post appears, for counts that render late.
    settle: Duration,
}

impl Default for BrowserExtractorFactory {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(15),
            settle: Duration::from_secs(2),
        }
    }
}

impl BrowserExtractorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// `CHROME_BIN` wins; otherwise well-known paths are probed and `None`
    /// leaves the lookup to `chromiumoxide`.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

impl ExtractorFactory for BrowserExtractorFactory {
    type Extractor = BrowserExtractor;

    async fn open(&self) -> Result<BrowserExtractor, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--window-size=1920,1080")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        tracing::info!("Browser session opened");
        Ok(BrowserExtractor {
            browser,
            handler_task,
            load_timeout: self.load_timeout,
            settle: self.settle,
        })
    }
}

/// One headless Chromium process. Each extraction uses a fresh tab.
pub struct BrowserExtractor {
    browser: Browser,
    handler_task: JoinHandle<()>,
    load_timeout: Duration,
    settle: Duration,
}

impl BrowserExtractor {
    /// Polls for the post article until it appears or the load timeout passes.
    async fn wait_for_tweet(&self, page: &Page, url: &str) -> Result<(), AppError> {
        let deadline = tokio::time::Instant::now() + self.load_timeout;
        loop {
            if page.find_element(TWEET_SELECTOR).await.is_ok() {
                tracing::debug!(url, "Post article rendered");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::ExtractionFailed(format!(
                    "Timeout waiting for tweet to load after {}s",
                    self.load_timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn render(&self, page: &Page, url: &str) -> Result<String, AppError> {
        self.wait_for_tweet(page, url).await?;
        tokio::time::sleep(self.settle).await;
        page.content()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))
    }
}

impl MetricsExtractor for BrowserExtractor {
    async fn extract(&self, url: &str) -> Result<Metrics, AppError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to navigate: {e}")))?;

        let html = self.render(&page, url).await;

        // Close the tab to free browser resources.
        let _ = page.close().await;

        parse_metrics(&html?)
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "Failed to close browser cleanly");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        tracing::info!("Browser session closed");
    }
}
