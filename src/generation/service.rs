use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::UpstreamConfig;
use crate::generation::error::GenerationError;
use crate::generation::orchestrator::{PollPolicy, PollingOrchestrator, Task, TaskState};
use crate::generation::prompt::{AspectRatio, GenerationRequest, QualityHint};
use crate::generation::status::{normalize, CanonicalStatus};
use crate::generation::upstream::{HttpUpstreamClient, SharedUpstreamClient, UpstreamError};

/// Raw inbound parameters, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationInput {
    pub scene_text: Option<String>,
    pub aspect_ratio: Option<String>,
    pub quality: Option<String>,
}

#[derive(Clone)]
pub struct GenerationService {
    client: SharedUpstreamClient,
    orchestrator: PollingOrchestrator,
}

impl GenerationService {
    pub fn new(client: SharedUpstreamClient, policy: PollPolicy) -> Self {
        let orchestrator = PollingOrchestrator::new(client.clone(), policy);
        Self {
            client,
            orchestrator,
        }
    }

    pub fn from_config(
        upstream: &UpstreamConfig,
        policy: PollPolicy,
    ) -> Result<Self, UpstreamError> {
        let client: SharedUpstreamClient = Arc::new(HttpUpstreamClient::new(upstream)?);
        Ok(Self::new(client, policy))
    }

    pub fn policy(&self) -> PollPolicy {
        self.orchestrator.policy()
    }

    /// Same upstream client, shorter overall budget.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self::new(
            self.client.clone(),
            PollPolicy {
                deadline,
                ..self.policy()
            },
        )
    }

    /// Client-driven style: submit and hand the task id back immediately.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<Task, GenerationError> {
        self.orchestrator.submit(request).await
    }

    /// Server-driven style: submit and poll to a final state. A cancelled run
    /// is returned as `Ok` with state `Cancelled`.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Task, GenerationError> {
        let task = self.orchestrator.run(request, cancel).await?;
        finish_task(task)
    }

    /// One upstream query and one normalization pass; stateless.
    pub async fn query_status(&self, task_id: &str) -> Result<CanonicalStatus, GenerationError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(GenerationError::Validation(String::from(
                "Query parameter 'taskId' is required",
            )));
        }
        let envelope = self
            .client
            .query_status(task_id)
            .await
            .map_err(GenerationError::from_query)?;
        let status = normalize(&envelope.payload)?;
        info!(task_id, status = status.as_str(), "status query normalized");
        Ok(status)
    }
}

pub fn validate_generation_input(input: GenerationInput) -> Result<GenerationRequest, GenerationError> {
    let scene_text = input
        .scene_text
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if scene_text.is_empty() {
        return Err(GenerationError::Validation(String::from(
            "Field 'sceneText' is required",
        )));
    }

    let aspect_ratio = match non_blank(input.aspect_ratio.as_deref()) {
        Some(raw) => raw
            .parse::<AspectRatio>()
            .map_err(GenerationError::Validation)?,
        None => AspectRatio::default(),
    };
    let quality = match non_blank(input.quality.as_deref()) {
        Some(raw) => raw
            .parse::<QualityHint>()
            .map_err(GenerationError::Validation)?,
        None => QualityHint::default(),
    };

    Ok(GenerationRequest {
        scene_text: scene_text.to_string(),
        aspect_ratio,
        quality,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn finish_task(task: Task) -> Result<Task, GenerationError> {
    match task.state {
        TaskState::Ready | TaskState::Cancelled => Ok(task),
        TaskState::Failed => {
            warn!(task_id = %task.task_id, "upstream reported failure");
            Err(GenerationError::UpstreamReportedFailure {
                reason: task
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| String::from(crate::generation::status::DEFAULT_FAILURE_REASON)),
                fail_code: task.failure_code.clone(),
                task_id: task.task_id,
            })
        }
        TaskState::TimedOut => Err(GenerationError::PollTimeout {
            task_id: task.task_id,
        }),
        TaskState::Submitted | TaskState::Polling => Err(GenerationError::Internal(format!(
            "task {} stopped in non-final state {}",
            task.task_id,
            task.state.as_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::upstream::{UpstreamClient, UpstreamEnvelope};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        submits: Mutex<Vec<String>>,
        queries: Mutex<Vec<String>>,
        payload: Mutex<Option<Value>>,
    }

    #[async_trait]
    impl UpstreamClient for FakeClient {
        async fn submit(
            &self,
            prompt: &str,
            _aspect_ratio: AspectRatio,
            _quality: QualityHint,
        ) -> Result<String, UpstreamError> {
            self.submits
                .lock()
                .expect("fake client mutex poisoned")
                .push(prompt.to_string());
            Ok(String::from("T1"))
        }

        async fn query_status(&self, task_id: &str) -> Result<UpstreamEnvelope, UpstreamError> {
            self.queries
                .lock()
                .expect("fake client mutex poisoned")
                .push(task_id.to_string());
            let payload = self
                .payload
                .lock()
                .expect("fake client mutex poisoned")
                .clone()
                .unwrap_or_else(|| json!({"state": "waiting"}));
            Ok(UpstreamEnvelope {
                code: 200,
                message: String::from("success"),
                payload,
            })
        }
    }

    fn service_with(payload: Option<Value>) -> (GenerationService, Arc<FakeClient>) {
        let client = Arc::new(FakeClient::default());
        *client.payload.lock().expect("fake client mutex poisoned") = payload;
        let policy = PollPolicy {
            deadline: Duration::from_secs(10),
            ..PollPolicy::default()
        };
        (GenerationService::new(client.clone(), policy), client)
    }

    fn valid_request() -> GenerationRequest {
        validate_generation_input(GenerationInput {
            scene_text: Some(String::from("a busy farm")),
            ..GenerationInput::default()
        })
        .expect("input should validate")
    }

    #[test]
    fn validation_rejects_blank_scene_and_bad_enums() {
        let err = validate_generation_input(GenerationInput {
            scene_text: Some(String::from("   ")),
            ..GenerationInput::default()
        })
        .expect_err("blank scene should fail");
        assert!(matches!(err, GenerationError::Validation(ref m) if m == "Field 'sceneText' is required"));

        let err = validate_generation_input(GenerationInput {
            scene_text: Some(String::from("dog")),
            quality: Some(String::from("ultra")),
            ..GenerationInput::default()
        })
        .expect_err("bad quality should fail");
        assert!(matches!(err, GenerationError::Validation(_)));

        let err = validate_generation_input(GenerationInput {
            scene_text: Some(String::from("dog")),
            aspect_ratio: Some(String::from("panorama")),
            ..GenerationInput::default()
        })
        .expect_err("bad ratio should fail");
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[test]
    fn validation_applies_defaults_and_trims_scene() {
        let request = validate_generation_input(GenerationInput {
            scene_text: Some(String::from("  spiderman reading books ")),
            aspect_ratio: None,
            quality: Some(String::from(" ")),
        })
        .expect("input should validate");
        assert_eq!(
            request,
            GenerationRequest {
                scene_text: String::from("spiderman reading books"),
                aspect_ratio: AspectRatio::Portrait,
                quality: QualityHint::Medium,
            }
        );
    }

    #[tokio::test]
    async fn submit_sends_built_prompt_and_returns_task() {
        let (service, client) = service_with(None);
        let task = service
            .submit(&valid_request())
            .await
            .expect("submit should succeed");
        assert_eq!(task.task_id, "T1");
        assert_eq!(task.state, TaskState::Submitted);

        let submits = client.submits.lock().expect("fake client mutex poisoned").clone();
        assert_eq!(submits.len(), 1);
        assert!(submits[0].contains("a busy farm"));
        assert!(client.queries.lock().expect("fake client mutex poisoned").is_empty());
    }

    #[tokio::test]
    async fn query_status_requires_task_id_without_contacting_upstream() {
        let (service, client) = service_with(None);
        let err = service.query_status("  ").await.expect_err("blank id should fail");
        assert!(matches!(err, GenerationError::Validation(_)));
        assert!(client.queries.lock().expect("fake client mutex poisoned").is_empty());
    }

    #[tokio::test]
    async fn query_status_is_idempotent_for_ready_tasks() {
        let (service, _client) = service_with(Some(json!({
            "successFlag": 1,
            "response": {"result_urls": ["https://x/img.png"]}
        })));
        let first = service.query_status("T1").await.expect("query should succeed");
        let second = service.query_status("T1").await.expect("query should succeed");
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn generate_maps_failed_and_timed_out_tasks_to_errors() {
        let (service, _client) = service_with(Some(json!({"state": "fail", "failCode": "E1"})));
        let err = service
            .generate(&valid_request(), &CancellationToken::new())
            .await
            .expect_err("failed task should error");
        match err {
            GenerationError::UpstreamReportedFailure {
                task_id,
                reason,
                fail_code,
            } => {
                assert_eq!(task_id, "T1");
                assert_eq!(reason, "generation failed");
                assert_eq!(fail_code.as_deref(), Some("E1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let (service, client) = service_with(None);
        let err = service
            .generate(&valid_request(), &CancellationToken::new())
            .await
            .expect_err("never-ready task should time out");
        assert!(matches!(err, GenerationError::PollTimeout { ref task_id } if task_id == "T1"));
        assert_eq!(client.queries.lock().expect("fake client mutex poisoned").len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn generate_returns_cancelled_task_once_token_fires() {
        let (service, client) = service_with(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let run = tokio::spawn(async move { service.generate(&valid_request(), &token).await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        let task = run
            .await
            .expect("run should join")
            .expect("cancellation is not an error");

        assert_eq!(task.state, TaskState::Cancelled);
        assert_eq!(client.queries.lock().expect("fake client mutex poisoned").len(), 2);
    }
}
