use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{OracleConfig, MAX_RETRIES_CAP};

const BASE_BACKOFF_MS: u64 = 200;

/// One structured-output request: the oracle must answer with JSON shaped like `schema`.
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub system: String,
    pub prompt: String,
    pub schema_name: &'static str,
    pub schema: Value,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyChoices,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle not configured: {0}")]
    NotConfigured(&'static str),
    #[error("oracle call cancelled")]
    Cancelled,
    #[error("all {attempts} oracle backends failed, last error: {last}")]
    Exhausted { attempts: usize, last: Box<BackendError> },
    #[error("oracle returned an unusable payload: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait OracleBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &OracleRequest) -> Result<Value, BackendError>;
}

// ========== HTTP backend ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` backend bound to one model.
#[derive(Clone)]
pub struct HttpOracleBackend {
    model: String,
    api_key: String,
    api_endpoint: String,
    max_retries: usize,
    client: reqwest::Client,
}

impl HttpOracleBackend {
    pub fn new(model: impl Into<String>, config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or(OracleError::NotConfigured("ORACLE_API_KEY"))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            model: model.into(),
            api_key,
            api_endpoint: config.api_endpoint.clone(),
            max_retries: config.max_retries.min(MAX_RETRIES_CAP),
            client,
        })
    }

    async fn post_with_retry(&self, url: &str, payload: &Value) -> Result<ChatResponse, BackendError> {
        let mut retry = 0;
        loop {
            let err = match self
                .client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        return serde_json::from_slice(&bytes).map_err(|e| {
                            tracing::error!(model = %self.model, error = %e, "failed to parse oracle response");
                            BackendError::Json(e)
                        });
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let retryable = is_retryable(status);
                    let err = BackendError::HttpStatus { status, body };
                    if !retryable {
                        return Err(err);
                    }
                    err
                }
                Err(e) => BackendError::Request(e),
            };

            if retry >= self.max_retries {
                return Err(err);
            }
            let backoff = backoff_delay(retry);
            warn!(model = %self.model, retry, error = %err, "oracle request failed, retrying");
            sleep(backoff).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl OracleBackend for HttpOracleBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &OracleRequest) -> Result<Value, BackendError> {
        let url = format!("{}/chat/completions", self.api_endpoint.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                ChatMessage { role: "system".into(), content: request.system.clone() },
                ChatMessage { role: "user".into(), content: request.prompt.clone() },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": request.schema_name, "schema": request.schema }
            },
            "stream": false
        });

        let response = self.post_with_retry(&url, &payload).await?;
        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(BackendError::EmptyChoices)?;
        parse_json_content(content)
    }
}

/// Accepts bare JSON or JSON wrapped in a Markdown code fence.
pub fn parse_json_content(raw: &str) -> Result<Value, BackendError> {
    let trimmed = raw.trim();
    let json_str = trimmed
        .strip_prefix("```json")
        .and_then(|s| s.strip_suffix("```"))
        .or_else(|| trimmed.strip_prefix("```").and_then(|s| s.strip_suffix("```")))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(json_str.trim())?)
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

// ========== Fallback chain ==========

/// Ordered list of backends; each is tried in turn until one answers.
#[derive(Clone, Default)]
pub struct OracleChain {
    backends: Vec<Arc<dyn OracleBackend>>,
}

impl OracleChain {
    pub fn new(backends: Vec<Arc<dyn OracleBackend>>) -> Self {
        Self { backends }
    }

    /// One HTTP backend per configured model, in configuration order.
    pub fn from_config(config: &OracleConfig) -> Self {
        let mut backends: Vec<Arc<dyn OracleBackend>> = Vec::new();
        for model in &config.models {
            match HttpOracleBackend::new(model.clone(), config) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(err) => {
                    warn!(model = %model, error = %err, "oracle backend not initialized");
                }
            }
        }
        Self { backends }
    }

    pub fn is_available(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Tries each backend in order. A reply that `decode` rejects counts as
    /// that backend's failure, so the next one is tried.
    async fn run<T>(
        self,
        request: OracleRequest,
        decode: fn(Value) -> Result<T, BackendError>,
    ) -> Result<T, OracleError> {
        let attempts = self.backends.len();
        let mut last: Option<BackendError> = None;

        for (index, backend) in self.backends.iter().enumerate() {
            match backend.generate(&request).await.and_then(decode) {
                Ok(value) => {
                    if index > 0 {
                        tracing::info!(backend = backend.name(), index, "oracle answered after fallback");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    warn!(backend = backend.name(), index, error = %err, "oracle backend failed, falling back");
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => Err(OracleError::Exhausted {
                attempts,
                last: Box::new(last),
            }),
            None => Err(OracleError::NotConfigured("ORACLE_MODELS")),
        }
    }

    /// Runs the chain on a spawned task. Cancelling stops the wait right away;
    /// the in-flight request still finishes and its result is dropped.
    pub async fn generate(&self, request: OracleRequest, cancel: &CancellationToken) -> Result<Value, OracleError> {
        self.spawn_run(request, Ok, cancel).await
    }

    /// Like [`generate`](Self::generate) but deserializes the answer into `T`;
    /// a backend whose answer does not fit `T` is skipped like a failed one.
    pub async fn generate_as<T>(&self, request: OracleRequest, cancel: &CancellationToken) -> Result<T, OracleError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        self.spawn_run(request, decode_as::<T>, cancel).await
    }

    async fn spawn_run<T: Send + 'static>(
        &self,
        request: OracleRequest,
        decode: fn(Value) -> Result<T, BackendError>,
        cancel: &CancellationToken,
    ) -> Result<T, OracleError> {
        if cancel.is_cancelled() {
            return Err(OracleError::Cancelled);
        }
        if self.backends.is_empty() {
            return Err(OracleError::NotConfigured("ORACLE_MODELS"));
        }

        let chain = self.clone();
        let handle = tokio::spawn(chain.run(request, decode));

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("oracle wait cancelled, discarding in-flight result");
                Err(OracleError::Cancelled)
            }
            joined = handle => match joined {
                Ok(result) => result,
                Err(e) => Err(OracleError::Exhausted {
                    attempts: self.backends.len(),
                    last: Box::new(BackendError::Other(format!("oracle task failed: {e}"))),
                }),
            },
        }
    }
}

/// Doubling delay before retry number `retry + 1`, saturating instead of
/// overflowing.
fn backoff_delay(retry: usize) -> Duration {
    let factor = u32::try_from(retry)
        .ok()
        .and_then(|shift| 1u64.checked_shl(shift))
        .unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor))
}

fn decode_as<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(BackendError::Json)
}
