use crate::config::Settings;
use crate::error::TransportError;
use crate::ingest::types::{Page, PageResponse};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;
const CURSOR_PARAM: &str = "next_page";

#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Fetches the page after `cursor` (the first page when `None`).
    ///
    /// Never fails: transport problems are logged and reported as an exhausted page so the
    /// caller stops paging cleanly.
    async fn fetch_page(&self, cursor: Option<&str>) -> Page;
}

#[derive(Debug, Clone)]
pub struct HttpPageClient {
    http: reqwest::Client,
    url: String,
    bearer_token: String,
    retries: u32,
    backoff_base: Duration,
}

impl HttpPageClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings.require_source_api_url()?.to_string();
        let bearer_token = settings.require_source_bearer_token()?.to_string();

        let timeout_secs = std::env::var("SOURCE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("SOURCE_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        Self::new(url, bearer_token, Duration::from_secs(timeout_secs), retries)
    }

    pub fn new(
        url: impl Into<String>,
        bearer_token: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build rating source http client")?;

        Ok(Self {
            http,
            url: url.into(),
            bearer_token: bearer_token.into(),
            retries: retries.max(1),
            backoff_base: Duration::from_secs(1),
        })
    }

    fn headers(&self) -> Result<HeaderMap, TransportError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.bearer_token))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    async fn fetch_once(&self, cursor: Option<&str>) -> Result<Page, TransportError> {
        let mut req = self.http.get(&self.url).headers(self.headers()?);
        if let Some(cursor) = cursor {
            req = req.query(&[(CURSOR_PARAM, cursor)]);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                url: res.url().to_string(),
            });
        }

        let text = res.text().await?;
        decode_page(&text)
    }

    /// Like [`PageSource::fetch_page`] but keeps the failure, after retrying transient ones.
    pub async fn try_fetch_page(&self, cursor: Option<&str>) -> Result<Page, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(cursor).await {
                Ok(page) => return Ok(page),
                Err(err) => {
                    if attempt >= self.retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = self.backoff_base * (1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "source page fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl PageSource for HttpPageClient {
    fn source_name(&self) -> &'static str {
        "http_json_pages"
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Page {
        match self.try_fetch_page(cursor).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(
                    cursor = cursor.unwrap_or_default(),
                    error = %err,
                    "source page fetch failed; treating as end of pagination"
                );
                Page::exhausted()
            }
        }
    }
}

pub fn decode_page(body: &str) -> Result<Page, TransportError> {
    let resp = serde_json::from_str::<PageResponse>(body)?;
    Ok(resp.into())
}

fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Request(_) => true,
        TransportError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        TransportError::Decode(_) | TransportError::InvalidHeader(_) => false,
    }
}
