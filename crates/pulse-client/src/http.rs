use std::time::Duration;

use pulse_core::error::AppError;
use pulse_core::models::Metrics;
use pulse_core::traits::{ExtractorFactory, MetricsExtractor};
use reqwest::{Client, StatusCode};

use crate::parse::parse_metrics;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Opens plain-HTTP extraction sessions.
///
/// Works against pages that are rendered server-side (mirrors, archived
/// copies, test fixtures). For the live site, which renders client-side, use
/// the `browser` feature's `BrowserExtractorFactory`.
#[derive(Debug, Clone)]
pub struct HttpExtractorFactory {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpExtractorFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpExtractorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl ExtractorFactory for HttpExtractorFactory {
    type Extractor = HttpExtractor;

    async fn open(&self) -> Result<HttpExtractor, AppError> {
        // A fresh client per session: no connection or cookie reuse across a block.
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        tracing::debug!("HTTP extraction session opened");
        Ok(HttpExtractor {
            client,
            timeout_secs: self.timeout.as_secs(),
        })
    }
}

/// HTTP extractor using reqwest: downloads the post page and parses it.
pub struct HttpExtractor {
    client: Client,
    timeout_secs: u64,
}

impl HttpExtractor {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        // Error texts are classified for blocking, so they must not carry the URL.
        let response = self.client.get(url).send().await.map_err(|e| {
            let e = e.without_url();
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| {
            AppError::HttpError(format!("Failed to read response body: {}", e.without_url()))
        })
    }
}

impl MetricsExtractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<Metrics, AppError> {
        let html = self.fetch(url).await?;
        parse_metrics(&html)
    }

    async fn close(self) {
        tracing::debug!("HTTP extraction session closed");
    }
}
