pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`model` must not be empty")]
    InvalidModel,

    #[error("`concurrency` must be a positive integer")]
    InvalidConcurrency,

    #[error("`total_requests` must be a positive integer")]
    InvalidTotalRequests,

    #[error("`prompt` must not be empty")]
    InvalidPrompt,

    #[error("`user_count` must be between 1 and {max}", max = crate::config::MAX_USER_COUNT)]
    InvalidUserCount,

    #[error("`queries_per_user` must be a positive integer")]
    InvalidQueriesPerUser,

    #[error("custom prompt list must contain at least one non-empty line")]
    InvalidCustomPrompts,

    #[error("inference gateway is not available")]
    GatewayUnavailable,

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
