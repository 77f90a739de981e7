//! Chat-completions transport handles (async and blocking).

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use openlike_core::error::{OpenlikeError, Result};

use crate::retry::{calculate_backoff, is_retryable_error, is_retryable_status, RetryPolicy};

/// Everything needed to address the chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub api_key: SecretString,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Endpoint {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        default_headers: &HashMap<String, String>,
        default_query: &HashMap<String, String>,
        timeout: Option<Duration>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            url: completions_url(base_url),
            api_key,
            headers: build_headers(default_headers)?,
            query: default_query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout,
            retry,
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }
}

/// `{base}/chat/completions`, tolerating a trailing slash on the base.
pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| OpenlikeError::Config(format!("invalid header name {k:?}: {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| OpenlikeError::Config(format!("invalid value for header {k}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Async handle on `chat/completions`.
#[derive(Debug, Clone)]
pub struct Completions {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl Completions {
    pub fn new(http: reqwest::Client, endpoint: Endpoint) -> Self {
        Self { http, endpoint }
    }

    /// POST `body`, retrying transient failures. Non-2xx statuses become
    /// [`OpenlikeError::LlmRequest`].
    pub async fn create(&self, body: &Value) -> Result<reqwest::Response> {
        let endpoint = &self.endpoint;
        let mut attempt = 0;

        loop {
            let mut req = self
                .http
                .post(&endpoint.url)
                .headers(endpoint.headers.clone())
                .header(AUTHORIZATION, endpoint.bearer())
                .query(&endpoint.query)
                .json(body);
            if let Some(timeout) = endpoint.timeout {
                req = req.timeout(timeout);
            }

            debug!(url = %endpoint.url, attempt, "Sending chat completion request");

            let failure = match req.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "unknown".to_string());
                    (is_retryable_status(status), format!("HTTP {}: {}", status, body))
                }
                Err(e) => (is_retryable_error(&e), e.to_string()),
            };

            match failure {
                (true, msg) if attempt < endpoint.retry.max_retries => {
                    let backoff = calculate_backoff(attempt, &endpoint.retry);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = endpoint.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %msg,
                        "Retrying chat completion request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                (_, msg) => return Err(OpenlikeError::LlmRequest(msg)),
            }
        }
    }
}

/// Blocking handle on `chat/completions`.
#[derive(Debug, Clone)]
pub struct BlockingCompletions {
    http: reqwest::blocking::Client,
    endpoint: Endpoint,
}

impl BlockingCompletions {
    pub fn new(http: reqwest::blocking::Client, endpoint: Endpoint) -> Self {
        Self { http, endpoint }
    }

    pub fn create(&self, body: &Value) -> Result<reqwest::blocking::Response> {
        let endpoint = &self.endpoint;
        let mut attempt = 0;

        loop {
            let mut req = self
                .http
                .post(&endpoint.url)
                .headers(endpoint.headers.clone())
                .header(AUTHORIZATION, endpoint.bearer())
                .query(&endpoint.query)
                .json(body);
            if let Some(timeout) = endpoint.timeout {
                req = req.timeout(timeout);
            }

            debug!(url = %endpoint.url, attempt, "Sending blocking chat completion request");

            let failure = match req.send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().unwrap_or_else(|_| "unknown".to_string());
                    (is_retryable_status(status), format!("HTTP {}: {}", status, body))
                }
                Err(e) => (is_retryable_error(&e), e.to_string()),
            };

            match failure {
                (true, msg) if attempt < endpoint.retry.max_retries => {
                    let backoff = calculate_backoff(attempt, &endpoint.retry);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = endpoint.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %msg,
                        "Retrying chat completion request"
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                (_, msg) => return Err(OpenlikeError::LlmRequest(msg)),
            }
        }
    }
}
