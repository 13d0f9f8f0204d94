//! Maps upstream job records onto the canonical `generating | ready | failed`
//! status.
//!
//! Two payload dialects exist upstream. Detection is by field presence only:
//! an object with `successFlag` is the flag dialect, otherwise an object with
//! `state` is the state dialect. Anything else is rejected.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_FAILURE_REASON: &str = "generation failed";

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalStatus {
    Generating { progress: Option<Value> },
    Ready { image_url: String },
    Failed {
        reason: String,
        fail_code: Option<String>,
    },
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating { .. } => "generating",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Generating { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unrecognized upstream payload: {0}")]
    UnrecognizedPayload(String),
    #[error("invalid {dialect} record: {message}")]
    InvalidRecord {
        dialect: &'static str,
        message: String,
    },
}

/// `record-info` shape with a tri-state numeric flag.
#[derive(Debug, Clone, Deserialize)]
pub struct FlagRecord {
    #[serde(rename = "successFlag")]
    pub success_flag: i64,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub response: Option<FlagResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagResponse {
    #[serde(default)]
    pub result_urls: Option<Value>,
}

/// `recordInfo` shape with a `waiting | success | fail` state string.
#[derive(Debug, Clone, Deserialize)]
pub struct StateRecord {
    pub state: String,
    #[serde(rename = "resultJson", default)]
    pub result_json: Option<String>,
    #[serde(rename = "failCode", default)]
    pub fail_code: Option<Value>,
    #[serde(rename = "failMsg", default)]
    pub fail_msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StateResultJson {
    #[serde(rename = "resultUrls", default)]
    result_urls: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum UpstreamRecord {
    Flag(FlagRecord),
    State(StateRecord),
}

impl UpstreamRecord {
    pub fn detect(payload: &Value) -> Result<Self, NormalizeError> {
        let Some(object) = payload.as_object() else {
            return Err(NormalizeError::UnrecognizedPayload(String::from(
                "payload is not an object",
            )));
        };
        if object.contains_key("successFlag") {
            return serde_json::from_value(payload.clone())
                .map(Self::Flag)
                .map_err(|e| NormalizeError::InvalidRecord {
                    dialect: "flag",
                    message: e.to_string(),
                });
        }
        if object.contains_key("state") {
            return serde_json::from_value(payload.clone())
                .map(Self::State)
                .map_err(|e| NormalizeError::InvalidRecord {
                    dialect: "state",
                    message: e.to_string(),
                });
        }
        Err(NormalizeError::UnrecognizedPayload(String::from(
            "neither successFlag nor state present",
        )))
    }
}

pub fn normalize(payload: &Value) -> Result<CanonicalStatus, NormalizeError> {
    match UpstreamRecord::detect(payload)? {
        UpstreamRecord::Flag(record) => normalize_flag_record(record),
        UpstreamRecord::State(record) => normalize_state_record(record),
    }
}

fn normalize_flag_record(record: FlagRecord) -> Result<CanonicalStatus, NormalizeError> {
    match record.success_flag {
        0 => Ok(CanonicalStatus::Generating {
            progress: record.progress.filter(|v| !v.is_null()),
        }),
        1 => {
            let url = record
                .response
                .and_then(|response| response.result_urls)
                .as_ref()
                .and_then(first_url);
            Ok(ready_or_generating(url))
        }
        2 => Ok(failed(record.error_message, None)),
        other => Err(NormalizeError::UnrecognizedPayload(format!(
            "successFlag {other}"
        ))),
    }
}

fn normalize_state_record(record: StateRecord) -> Result<CanonicalStatus, NormalizeError> {
    match record.state.trim().to_ascii_lowercase().as_str() {
        "waiting" | "queuing" | "generating" => Ok(CanonicalStatus::Generating { progress: None }),
        "success" => {
            let url = record
                .result_json
                .as_deref()
                .and_then(|raw| serde_json::from_str::<StateResultJson>(raw).ok())
                .and_then(|parsed| parsed.result_urls)
                .as_ref()
                .and_then(first_url);
            Ok(ready_or_generating(url))
        }
        "fail" => Ok(failed(
            record.fail_msg,
            record.fail_code.as_ref().and_then(code_to_string),
        )),
        other => Err(NormalizeError::UnrecognizedPayload(format!("state {other}"))),
    }
}

// Success without a usable URL has not materialized yet.
fn ready_or_generating(url: Option<String>) -> CanonicalStatus {
    match url {
        Some(image_url) => CanonicalStatus::Ready { image_url },
        None => CanonicalStatus::Generating { progress: None },
    }
}

fn failed(reason: Option<String>, fail_code: Option<String>) -> CanonicalStatus {
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| String::from(DEFAULT_FAILURE_REASON));
    CanonicalStatus::Failed { reason, fail_code }
}

fn first_url(urls: &Value) -> Option<String> {
    urls.as_array()?
        .first()?
        .as_str()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn code_to_string(code: &Value) -> Option<String> {
    match code {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
