pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod status;
pub mod upstream;

pub use error::GenerationError;
pub use orchestrator::{PollPolicy, PollingOrchestrator, Task, TaskHandle, TaskState};
pub use prompt::{build_prompt, AspectRatio, GenerationRequest, QualityHint};
pub use service::{validate_generation_input, GenerationInput, GenerationService};
pub use status::{normalize, CanonicalStatus};
pub use upstream::{HttpUpstreamClient, SharedUpstreamClient, UpstreamClient, UpstreamDialect};
