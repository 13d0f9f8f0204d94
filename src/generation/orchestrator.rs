use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generation::error::GenerationError;
use crate::generation::prompt::{build_prompt, GenerationRequest};
use crate::generation::status::{normalize, CanonicalStatus};
use crate::generation::upstream::SharedUpstreamClient;

/// Upper bound on any poll budget; longer deadlines are clamped to it.
pub const MAX_POLL_DEADLINE: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff_step: Duration,
    pub max_backoff: Duration,
    /// Overall budget, measured from submission.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            backoff_step: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            deadline: Duration::from_secs(180),
        }
    }
}

impl PollPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let cap = self.max_backoff.max(self.interval);
        current.saturating_add(self.backoff_step).min(cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Submitted,
    Polling,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskState::{Cancelled, Failed, Polling, Ready, Submitted, TimedOut};

        matches!(
            (self, next),
            (Submitted, Polling)
                | (Submitted, Cancelled)
                | (Polling, Ready)
                | (Polling, Failed)
                | (Polling, TimedOut)
                | (Polling, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: String,
    pub submitted_at: DateTime<Utc>,
    pub state: TaskState,
    pub result_url: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_code: Option<String>,
    pub polls: u32,
    pub transient_failures: u32,
}

impl Task {
    pub fn submitted(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            submitted_at: Utc::now(),
            state: TaskState::Submitted,
            result_url: None,
            failure_reason: None,
            failure_code: None,
            polls: 0,
            transient_failures: 0,
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal task transition {:?} -> {:?}",
            self.state,
            next
        );
        info!(
            task_id = %self.task_id,
            from = self.state.as_str(),
            to = next.as_str(),
            polls = self.polls,
            "task state transition"
        );
        self.state = next;
    }
}

/// Drives one submitted task to a final state. One instance per request.
#[derive(Clone)]
pub struct PollingOrchestrator {
    client: SharedUpstreamClient,
    policy: PollPolicy,
}

impl PollingOrchestrator {
    pub fn new(client: SharedUpstreamClient, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub async fn submit(&self, request: &GenerationRequest) -> Result<Task, GenerationError> {
        let prompt = build_prompt(request.scene_text.as_str());
        info!(
            aspect_ratio = request.aspect_ratio.as_token(),
            quality = request.quality.as_str(),
            scene_len = request.scene_text.chars().count(),
            "submitting generation task"
        );
        match self
            .client
            .submit(prompt.as_str(), request.aspect_ratio, request.quality)
            .await
        {
            Ok(task_id) => {
                info!(task_id = %task_id, from = "submitting", to = "submitted", "task state transition");
                Ok(Task::submitted(task_id))
            }
            Err(error) => {
                warn!(error = %error, from = "submitting", to = "failed", "task submission failed");
                Err(GenerationError::from_submit(error))
            }
        }
    }

    /// Submits then polls. Cancellation is honoured once a task id exists.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Task, GenerationError> {
        let task = self.submit(request).await?;
        let started = Instant::now();
        self.poll(task, started, cancel).await
    }

    pub fn spawn(&self, request: GenerationRequest) -> TaskHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let orchestrator = self.clone();
        let join = tokio::spawn(async move { orchestrator.run(&request, &token).await });
        TaskHandle { cancel, join }
    }

    /// Polls until ready, failed, timed out or cancelled. Only a configuration
    /// fault ends the loop with an error.
    pub async fn poll(
        &self,
        mut task: Task,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<Task, GenerationError> {
        let deadline = started + self.policy.deadline.min(MAX_POLL_DEADLINE);
        let mut backoff = self.policy.interval;
        task.advance(TaskState::Polling);

        loop {
            if cancel.is_cancelled() {
                task.advance(TaskState::Cancelled);
                return Ok(task);
            }
            if Instant::now() >= deadline {
                task.advance(TaskState::TimedOut);
                return Ok(task);
            }

            task.polls += 1;
            let queried = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    task.advance(TaskState::Cancelled);
                    return Ok(task);
                }
                queried = timeout_at(deadline, self.client.query_status(task.task_id.as_str())) => queried,
            };

            let delay = match queried {
                Err(_elapsed) => {
                    task.advance(TaskState::TimedOut);
                    return Ok(task);
                }
                Ok(Err(error)) if error.is_configuration() => {
                    return Err(GenerationError::from_query(error));
                }
                Ok(Err(error)) => {
                    task.transient_failures += 1;
                    backoff = self.policy.next_backoff(backoff);
                    warn!(
                        task_id = %task.task_id,
                        error = %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "status query failed; backing off"
                    );
                    backoff
                }
                Ok(Ok(envelope)) => match normalize(&envelope.payload) {
                    Ok(CanonicalStatus::Generating { progress }) => {
                        backoff = self.policy.interval;
                        debug!(task_id = %task.task_id, progress = ?progress, "task still generating");
                        self.policy.interval
                    }
                    Ok(CanonicalStatus::Ready { image_url }) => {
                        task.result_url = Some(image_url);
                        task.advance(TaskState::Ready);
                        return Ok(task);
                    }
                    Ok(CanonicalStatus::Failed { reason, fail_code }) => {
                        task.failure_reason = Some(reason);
                        task.failure_code = fail_code;
                        task.advance(TaskState::Failed);
                        return Ok(task);
                    }
                    Err(error) => {
                        task.transient_failures += 1;
                        backoff = self.policy.next_backoff(backoff);
                        warn!(
                            task_id = %task.task_id,
                            error = %error,
                            backoff_ms = backoff.as_millis() as u64,
                            "status payload not understood; backing off"
                        );
                        backoff
                    }
                },
            };

            let wake = Instant::now()
                .checked_add(delay)
                .map_or(deadline, |wake| wake.min(deadline));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    task.advance(TaskState::Cancelled);
                    return Ok(task);
                }
                _ = sleep_until(wake) => {}
            }
        }
    }
}

/// Caller-owned handle for a spawned generation run.
pub struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<Task, GenerationError>>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<Task, GenerationError> {
        self.join
            .await
            .map_err(|e| GenerationError::Internal(format!("generation task failed: {e}")))?
    }
}
