use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info_span;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::server::AppState;
use crate::generation::{GenerationError, TaskState};

use super::coloring::{parse_generation_payload, GenerationPayload};
use super::handler_utils::{internal_error, into_json, map_generation_error, ApiObject};

#[derive(Debug, Clone, Serialize)]
struct GenerateResponse {
    ok: bool,
    #[serde(rename = "taskId")]
    task_id: String,
    status: &'static str,
    #[serde(rename = "imageUrl")]
    image_url: String,
    polls: u32,
}

const MIN_DEADLINE: Duration = Duration::from_secs(1);

/// Server-driven long poll. The loop runs on its own task; a client
/// disconnect drops the guard, which cancels it.
pub async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationPayload>, JsonRejection>,
) -> ApiObject<Value> {
    let (payload, request) = match parse_generation_payload(payload) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let service = match payload.timeout_secs {
        Some(secs) => {
            let limit = state.generation.policy().deadline.max(MIN_DEADLINE);
            let deadline = Duration::from_secs(secs).clamp(MIN_DEADLINE, limit);
            state.generation.with_deadline(deadline)
        }
        None => state.generation.clone(),
    };

    let run_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let _cancel_on_disconnect = cancel.clone().drop_guard();
    let run = tokio::spawn(
        async move { service.generate(&request, &cancel).await }
            .instrument(info_span!("generate", %run_id)),
    );
    let result = run.await.unwrap_or_else(|error| {
        Err(GenerationError::Internal(format!(
            "generation run {run_id} aborted: {error}"
        )))
    });

    match result {
        Ok(task) if task.state == TaskState::Ready => match task.result_url {
            Some(image_url) => (
                StatusCode::OK,
                into_json(GenerateResponse {
                    ok: true,
                    task_id: task.task_id,
                    status: "ready",
                    image_url,
                    polls: task.polls,
                }),
            ),
            None => internal_error(format!("task {} ready without result url", task.task_id)),
        },
        Ok(task) => internal_error(format!(
            "task {} ended in unexpected state {}",
            task.task_id,
            task.state.as_str()
        )),
        Err(error) => map_generation_error(error),
    }
}
