use std::cmp::min;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use types::{CloudCredentials, RawStatusItem};

/// Source of raw device status. The scheduler only talks to this trait.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn get_status(
        &self,
        credentials: &CloudCredentials,
        device_id: &str,
    ) -> Result<Vec<RawStatusItem>, FetchError>;
}

/// Transport options for the HTTP cloud client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout in milliseconds, covering connect, send and body read.
    pub timeout_ms: u64,
    /// Number of retries per request after the initial attempt.
    pub retry_count: usize,
    /// Base delay between retries in milliseconds (exponential backoff).
    pub retry_backoff_ms: u64,
    /// Upper bound for retry backoff delay in milliseconds.
    pub retry_max_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_count: 1,
            retry_backoff_ms: 250,
            retry_max_backoff_ms: 2_000,
        }
    }
}

impl ClientConfig {
    /// Worst-case time one `get_status` call can take, backoff included.
    pub fn max_fetch_duration(&self) -> Duration {
        let attempts = self.retry_count as u64 + 1;
        let mut total = self.timeout_ms.saturating_mul(attempts);
        for attempt in 0..self.retry_count {
            total = total.saturating_add(retry_delay_ms(self, attempt));
        }
        Duration::from_millis(total)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("cloud api error {code}: {message}")]
    Api { code: String, message: String },
    #[error("response carries no usable result list")]
    MissingResult,
    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(_) | FetchError::Timeout { .. } => true,
            FetchError::Status(status) => *status >= 500,
            FetchError::Api { .. } | FetchError::MissingResult | FetchError::Body(_) => false,
        }
    }
}

/// Fetches DPS status over the vendor's REST API with a pre-issued access token.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    config: ClientConfig,
    http: Client,
}

impl HttpCloudClient {
    pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
        let http = Client::builder().build()?;
        Ok(Self { config, http })
    }

    async fn fetch_once(
        &self,
        credentials: &CloudCredentials,
        device_id: &str,
    ) -> Result<Vec<RawStatusItem>, FetchError> {
        let url = format!("{}/v1.0/devices/{}/status", base_url(credentials), device_id);
        let mut request = self
            .http
            .get(&url)
            .header("client_id", &credentials.api_key)
            .header("t", unix_ms().to_string());
        if let Some(token) = &credentials.access_token {
            request = request.header("access_token", token);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            Ok::<String, FetchError>(response.text().await?)
        };

        let body = match timeout(Duration::from_millis(self.config.timeout_ms), exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                })
            }
        };

        parse_status_body(&body)
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn get_status(
        &self,
        credentials: &CloudCredentials,
        device_id: &str,
    ) -> Result<Vec<RawStatusItem>, FetchError> {
        let mut attempts = 0usize;

        loop {
            match self.fetch_once(credentials, device_id).await {
                Ok(items) => {
                    debug!(device_id, items = items.len(), "cloud status ok");
                    return Ok(items);
                }
                Err(err) => {
                    if !err.is_retryable() || attempts >= self.config.retry_count {
                        return Err(err);
                    }
                    warn!(device_id, attempt = attempts + 1, error = %err, "cloud status failed, retrying");
                }
            }

            let delay_ms = retry_delay_ms(&self.config, attempts);
            attempts += 1;
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

/// Parses a status response; a lone result object counts as a one-item list.
pub fn parse_status_body(body: &str) -> Result<Vec<RawStatusItem>, FetchError> {
    let root: Value = serde_json::from_str(body)?;

    if root.get("success").and_then(Value::as_bool) == Some(false) {
        let code = root
            .get("code")
            .map(|code| match code {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "unknown".to_string());
        let message = root
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(FetchError::Api { code, message });
    }

    match root.get("result") {
        Some(result @ Value::Array(_)) => Ok(serde_json::from_value(result.clone())?),
        Some(result @ Value::Object(_)) => {
            let item: RawStatusItem =
                serde_json::from_value(result.clone()).map_err(|_| FetchError::MissingResult)?;
            Ok(vec![item])
        }
        _ => Err(FetchError::MissingResult),
    }
}

fn base_url(credentials: &CloudCredentials) -> String {
    match &credentials.base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("https://openapi.tuya{}.com", credentials.region.trim()),
    }
}

fn retry_delay_ms(config: &ClientConfig, attempt: usize) -> u64 {
    let base = config.retry_backoff_ms.max(1);
    let shift = u32::try_from(attempt).unwrap_or(u32::MAX);
    let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay = base.saturating_mul(factor);
    let max = config.retry_max_backoff_ms.max(base);
    min(delay, max)
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
