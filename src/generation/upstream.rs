use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::UpstreamConfig;
use crate::generation::prompt::{AspectRatio, QualityHint};

const ENVELOPE_SUCCESS_CODE: i64 = 200;

/// Upstream endpoint family. Both speak the same `{code, msg, data}` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamDialect {
    #[default]
    Jobs,
    Gpt4oImage,
}

impl UpstreamDialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jobs => "jobs",
            Self::Gpt4oImage => "gpt4o-image",
        }
    }

    fn submit_path(self) -> &'static str {
        match self {
            Self::Jobs => "/api/v1/jobs/createTask",
            Self::Gpt4oImage => "/api/v1/gpt4o-image/generate",
        }
    }

    fn status_path(self) -> &'static str {
        match self {
            Self::Jobs => "/api/v1/jobs/recordInfo",
            Self::Gpt4oImage => "/api/v1/gpt4o-image/record-info",
        }
    }

    fn submit_body(
        self,
        model: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
        quality: QualityHint,
    ) -> Value {
        match self {
            Self::Jobs => json!({
                "model": model,
                "input": {
                    "prompt": prompt,
                    "aspect_ratio": aspect_ratio.as_token(),
                    "quality": quality.as_str(),
                },
            }),
            Self::Gpt4oImage => json!({
                "prompt": prompt,
                "size": aspect_ratio.as_token(),
                "nVariants": 1,
            }),
        }
    }
}

impl FromStr for UpstreamDialect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jobs" => Ok(Self::Jobs),
            "gpt4o-image" | "gpt4o" => Ok(Self::Gpt4oImage),
            other => Err(format!("unknown upstream dialect: {other}")),
        }
    }
}

/// A validated upstream response: `code` was 200 and the body parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEnvelope {
    pub code: i64,
    pub message: String,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream API credential is not configured")]
    MissingCredential,
    #[error("upstream client setup failed: {0}")]
    Client(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}")]
    HttpStatus { status: u16, body: String },
    #[error("upstream returned a malformed body (HTTP {status})")]
    MalformedBody { status: u16, body: String },
    #[error("upstream rejected the request with code {code}: {message}")]
    Rejected {
        code: i64,
        message: String,
        body: String,
    },
    #[error("upstream accepted the job but returned no task id")]
    MissingTaskId { body: String },
}

impl UpstreamError {
    /// Raw upstream body for diagnostics; JSON when it parses, text otherwise.
    pub fn detail(&self) -> Value {
        let raw = match self {
            Self::HttpStatus { body, .. }
            | Self::MalformedBody { body, .. }
            | Self::Rejected { body, .. }
            | Self::MissingTaskId { body } => body.as_str(),
            Self::Transport(message) | Self::Client(message) => {
                return Value::String(message.clone())
            }
            Self::MissingCredential => return Value::Null,
        };
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredential)
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    async fn submit(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        quality: QualityHint,
    ) -> Result<String, UpstreamError>;

    async fn query_status(&self, task_id: &str) -> Result<UpstreamEnvelope, UpstreamError>;
}

pub type SharedUpstreamClient = Arc<dyn UpstreamClient>;

/// Validates an upstream HTTP response into an envelope.
pub fn parse_envelope(status: u16, body: &str) -> Result<UpstreamEnvelope, UpstreamError> {
    if !(200..300).contains(&status) {
        return Err(UpstreamError::HttpStatus {
            status,
            body: body.to_string(),
        });
    }
    let raw: RawEnvelope =
        serde_json::from_str(body).map_err(|_| UpstreamError::MalformedBody {
            status,
            body: body.to_string(),
        })?;
    let Some(code) = raw.code else {
        return Err(UpstreamError::MalformedBody {
            status,
            body: body.to_string(),
        });
    };
    let message = raw.msg.unwrap_or_default();
    if code != ENVELOPE_SUCCESS_CODE {
        return Err(UpstreamError::Rejected {
            code,
            message,
            body: body.to_string(),
        });
    }
    Ok(UpstreamEnvelope {
        code,
        message,
        payload: raw.data,
    })
}

pub fn extract_task_id(envelope: &UpstreamEnvelope, body: &str) -> Result<String, UpstreamError> {
    envelope
        .payload
        .get("taskId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| UpstreamError::MissingTaskId {
            body: body.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    dialect: UpstreamDialect,
    model: String,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UpstreamError::Client(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            dialect: config.dialect,
            model: config.model.clone(),
        })
    }

    fn credential(&self) -> Result<&str, UpstreamError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(UpstreamError::MissingCredential)
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        Url::parse(format!("{}{path}", self.api_base).as_str())
            .map_err(|e| UpstreamError::Client(format!("invalid upstream url: {e}")))
    }

    async fn read_response(response: reqwest::Response) -> Result<(u16, String), UpstreamError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(format!("failed reading body: {e}")))?;
        Ok((status, body))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn submit(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        quality: QualityHint,
    ) -> Result<String, UpstreamError> {
        let api_key = self.credential()?;
        let url = self.endpoint(self.dialect.submit_path())?;
        let body = self
            .dialect
            .submit_body(self.model.as_str(), prompt, aspect_ratio, quality);

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(format!("submit request failed: {e}")))?;
        let (status, raw) = Self::read_response(response).await?;
        debug!(http_status = status, dialect = self.dialect.as_str(), "upstream submit responded");

        let envelope = parse_envelope(status, raw.as_str())?;
        extract_task_id(&envelope, raw.as_str())
    }

    async fn query_status(&self, task_id: &str) -> Result<UpstreamEnvelope, UpstreamError> {
        let api_key = self.credential()?;
        let mut url = self.endpoint(self.dialect.status_path())?;
        url.query_pairs_mut().append_pair("taskId", task_id);

        let response = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(format!("status request failed: {e}")))?;
        let (status, raw) = Self::read_response(response).await?;
        debug!(http_status = status, task_id, "upstream status responded");

        parse_envelope(status, raw.as_str())
    }
}
