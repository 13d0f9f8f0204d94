use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ErrorKind;
use crate::api::server::AppState;
use crate::generation::{validate_generation_input, CanonicalStatus, GenerationInput, GenerationRequest};

use super::handler_utils::{error_response, into_json, map_generation_error, ApiObject};

/// Inbound generation body. `scene`, `format`/`size` and `quality` are accepted
/// as aliases; the scene is always raw text, never a prebuilt prompt. Unknown
/// fields such as `nVariants` are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPayload {
    #[serde(default, alias = "scene")]
    pub scene_text: Option<String>,
    #[serde(default, alias = "format", alias = "size")]
    pub aspect_ratio: Option<String>,
    #[serde(default, alias = "quality")]
    pub quality_hint: Option<String>,
    /// Long-poll only; clamped to the configured deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl GenerationPayload {
    fn to_input(&self) -> GenerationInput {
        GenerationInput {
            scene_text: self.scene_text.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            quality: self.quality_hint.clone(),
        }
    }
}

/// Unwraps the JSON body and validates it, or yields the 400 response.
pub(crate) fn parse_generation_payload(
    payload: Result<Json<GenerationPayload>, JsonRejection>,
) -> Result<(GenerationPayload, GenerationRequest), ApiObject<Value>> {
    let Json(payload) = payload.map_err(|rejection| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "invalid_json",
            format!("Invalid JSON body: {}", rejection.body_text()),
        )
    })?;
    let request = validate_generation_input(payload.to_input()).map_err(map_generation_error)?;
    Ok((payload, request))
}

#[derive(Debug, Clone, Serialize)]
struct SubmitResponse {
    ok: bool,
    #[serde(rename = "taskId")]
    task_id: String,
    state: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "taskId", default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    ok: bool,
    status: &'static str,
    #[serde(rename = "taskId")]
    task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<Value>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(rename = "failCode", skip_serializing_if = "Option::is_none")]
    fail_code: Option<String>,
}

impl StatusResponse {
    fn from_status(task_id: String, status: CanonicalStatus) -> Self {
        let label = status.as_str();
        let mut response = Self {
            ok: true,
            status: label,
            task_id,
            progress: None,
            image_url: None,
            error: None,
            fail_code: None,
        };
        match status {
            CanonicalStatus::Generating { progress } => response.progress = progress,
            CanonicalStatus::Ready { image_url } => response.image_url = Some(image_url),
            CanonicalStatus::Failed { reason, fail_code } => {
                response.error = Some(reason);
                response.fail_code = fail_code;
            }
        }
        response
    }
}

pub async fn submit_coloring_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationPayload>, JsonRejection>,
) -> ApiObject<Value> {
    let (_payload, request) = match parse_generation_payload(payload) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match state.generation.submit(&request).await {
        Ok(task) => (
            StatusCode::OK,
            into_json(SubmitResponse {
                ok: true,
                task_id: task.task_id,
                state: task.state.as_str(),
            }),
        ),
        Err(error) => map_generation_error(error),
    }
}

pub async fn coloring_status_handler(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiObject<Value> {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "invalid_query",
                format!("Invalid query string: {}", rejection.body_text()),
            );
        }
    };
    let task_id = query.task_id.unwrap_or_default().trim().to_string();
    match state.generation.query_status(task_id.as_str()).await {
        Ok(status) => (
            StatusCode::OK,
            into_json(StatusResponse::from_status(task_id, status)),
        ),
        Err(error) => map_generation_error(error),
    }
}
