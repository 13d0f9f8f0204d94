use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::api::error::ErrorKind;
use crate::generation::GenerationError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    error_kind: ErrorKind,
    error_code: String,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(rename = "failCode", skip_serializing_if = "Option::is_none")]
    fail_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

impl ErrorResponse {
    fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
            task_id: None,
            status: None,
            fail_code: None,
            detail: None,
        }
    }
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (status, into_json(ErrorResponse::new(kind, code, message)))
}

pub fn map_generation_error(error: GenerationError) -> ApiObject<Value> {
    match error {
        GenerationError::Validation(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "validation_error",
            message,
        ),
        GenerationError::Configuration(message) => {
            error!(detail = %message, "bridge configuration error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "configuration_error",
                "Upstream API credential is not configured",
            )
        }
        GenerationError::Submit(source) => {
            warn!(error = %source, "upstream submission failed");
            let mut body =
                ErrorResponse::new(ErrorKind::Provider, "upstream_submit_failed", "createTask failed");
            body.detail = Some(source.detail());
            (StatusCode::BAD_GATEWAY, into_json(body))
        }
        GenerationError::Query(source) => {
            warn!(error = %source, "upstream status query failed");
            let mut body = ErrorResponse::new(
                ErrorKind::Provider,
                "upstream_query_failed",
                "Status query failed",
            );
            body.detail = Some(source.detail());
            (StatusCode::BAD_GATEWAY, into_json(body))
        }
        GenerationError::Normalize(source) => {
            warn!(error = %source, "upstream status payload not understood");
            error_response(
                StatusCode::BAD_GATEWAY,
                ErrorKind::Provider,
                "upstream_payload_unrecognized",
                source.to_string(),
            )
        }
        GenerationError::UpstreamReportedFailure {
            task_id,
            reason,
            fail_code,
        } => {
            let mut body =
                ErrorResponse::new(ErrorKind::Provider, "upstream_reported_failure", reason);
            body.task_id = Some(task_id);
            body.status = Some("failed");
            body.fail_code = fail_code;
            (StatusCode::BAD_GATEWAY, into_json(body))
        }
        GenerationError::PollTimeout { task_id } => {
            let mut body =
                ErrorResponse::new(ErrorKind::Provider, "poll_timeout", "Polling timed out");
            body.task_id = Some(task_id);
            body.status = Some("timeout");
            (StatusCode::GATEWAY_TIMEOUT, into_json(body))
        }
        GenerationError::Internal(message) => internal_error(message),
    }
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).expect("api payload should serialize"))
}
