//! Chat completions client
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol. Rate-limited
//! requests are retried with exponential backoff.

use std::time::Duration;

use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::JudgeConfig;
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, Message};

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 500;

/// Chat completions client
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: JudgeConfig,
    api_key: Option<String>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

/// Builder for [`LlmClient`]
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<JudgeConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: JudgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Bearer token; local endpoints may need none
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs).max(1);
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            api_key: self.api_key,
        })
    }
}

impl LlmClient {
    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    /// Client for `config`, with the API key taken from the environment
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let mut builder = LlmClientBuilder::new().config(config.clone());
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Run one chat completion and return the first choice's content
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatRequest::new(&self.config.model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = self.execute_request(&request).await?;
        response
            .content()
            .map(str::to_string)
            .ok_or_else(|| Error::JudgeError("Empty response from API".to_string()))
    }

    async fn execute_request(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.send_request(request).await {
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                result => return result,
            }
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let mut builder = self.http_client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), retry_after, &body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::JudgeError(format!("Failed to parse response: {}", e)))
    }
}

fn status_error(status: u16, retry_after: Option<u64>, body: &str) -> Error {
    match status {
        401 | 403 => Error::JudgeError(format!(
            "Unauthorized: check the {} environment variable",
            crate::config::JUDGE_API_KEY_ENV
        )),
        429 => Error::RateLimited(retry_after.unwrap_or(1)),
        400 => Error::JudgeError(format!("Bad request: {}", body)),
        code => Error::JudgeError(format!("HTTP {}: {}", code, body)),
    }
}

/// Backoff in milliseconds for the given attempt, never shorter than the server's hint
fn calculate_backoff(attempt: u32, retry_after_secs: u64) -> u64 {
    let exponential = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    exponential.max(retry_after_secs.saturating_mul(1000))
}
