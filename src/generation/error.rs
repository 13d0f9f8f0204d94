use thiserror::Error;

use crate::generation::status::NormalizeError;
use crate::generation::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream submission failed: {0}")]
    Submit(#[source] UpstreamError),
    #[error("upstream status query failed: {0}")]
    Query(#[source] UpstreamError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("upstream reported failure for task {task_id}: {reason}")]
    UpstreamReportedFailure {
        task_id: String,
        reason: String,
        fail_code: Option<String>,
    },
    #[error("polling timed out for task {task_id}")]
    PollTimeout { task_id: String },
    #[error("{0}")]
    Internal(String),
}

impl GenerationError {
    pub(crate) fn from_submit(error: UpstreamError) -> Self {
        if error.is_configuration() {
            Self::Configuration(error.to_string())
        } else {
            Self::Submit(error)
        }
    }

    pub(crate) fn from_query(error: UpstreamError) -> Self {
        if error.is_configuration() {
            Self::Configuration(error.to_string())
        } else {
            Self::Query(error)
        }
    }
}
