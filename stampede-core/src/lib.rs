mod config;
mod coordinator;
mod error;
mod gateway;
mod registry;
mod sink;
mod source;
mod state;
mod stats;

pub use config::{
    DEFAULT_CONCURRENCY, DEFAULT_QUERY_DELAY, HomogeneousConfig, MAX_USER_COUNT, MultiUserConfig,
    PromptSource, RunConfig,
};
pub use error::{Error, Result};
pub use gateway::{GatewayError, GatewayResult, InferenceGateway, OllamaGateway};
pub use registry::RunRegistry;
pub use sink::{JsonLinesSink, NullSink, RunRecord, RunSink, SinkError};
pub use source::{PROMPT_CATALOG, Task, assign_prompts, sample_prompts};
pub use state::{QueryOutcome, RunId, RunStatus, StatusSnapshot, UserSession};
pub use stats::{LatencyStats, Statistics, TpmSample, compute as compute_statistics, tpm_windows};
