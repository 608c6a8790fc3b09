//! HTTP client for the query endpoint.
//!
//! Transient failures (connect errors, timeouts, HTTP 429 and 5xx) are retried
//! with exponential backoff. Decoding is never retried: a malformed response
//! fails the same way every time.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use dashscrape_decoder::{Table, decode, parse_response};
use dashscrape_shared::{DashscrapeError, EndpointConfig, Result};

/// Header carrying the public report's resource key.
const RESOURCE_KEY_HEADER: &str = "X-PowerBI-ResourceKey";

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Query endpoint client.
pub struct QueryClient {
    config: EndpointConfig,
    client: Client,
}

impl QueryClient {
    /// Create a new client with the given endpoint configuration.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| DashscrapeError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// POST `payload` and return the raw JSON response.
    #[instrument(skip_all, fields(url = %self.config.url))]
    pub async fn query(&self, payload: &Value) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            if !self.config.rate_limit.is_zero() {
                tokio::time::sleep(self.config.rate_limit).await;
            }

            match self.send_once(payload).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff(self.config.retry_backoff, attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient query failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// POST `payload` and decode the response into a flat table.
    pub async fn query_table(&self, payload: &Value) -> Result<Table> {
        let body = self.query(payload).await?;
        let response = parse_response(&body)?;
        let table = decode(&response)?;
        debug!(rows = table.len(), columns = table.columns().len(), "decoded query response");
        Ok(table)
    }

    async fn send_once(&self, payload: &Value) -> Result<Value> {
        let url = &self.config.url;

        let response = self
            .client
            .post(url.as_str())
            .header(RESOURCE_KEY_HEADER, &self.config.resource_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    DashscrapeError::transient(format!("{url}: {e}"))
                } else {
                    DashscrapeError::network(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{url}: HTTP {status}");
            return Err(if is_transient_status(status) {
                DashscrapeError::transient(message)
            } else {
                DashscrapeError::network(message)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DashscrapeError::transient(format!("{url}: body read failed: {e}")))?;

        serde_json::from_str(&body)
            .map_err(|e| DashscrapeError::schema(format!("{url}: response is not JSON: {e}")))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// `base * 2^attempt`, capped at [`MAX_BACKOFF`].
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}
