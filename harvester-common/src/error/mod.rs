use std::fmt::Debug;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Database Error: {0}")]
    Database(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource Not Found: {resource_type} with ID {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    #[error("Conflict Error: {0}")]
    Conflict(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Communication Error: {0}")]
    ChannelComm(String),

    #[error("Internal Error: {0}")]
    Internal(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Task {task_id} is busy: all {replicas} replica slots are in use")]
    TaskBusy { task_id: i64, replicas: u32 },

    #[error("Connectivity Failure: {0}")]
    ConnectivityFailure(String),

    #[error("Collection Failure: {0}")]
    CollectionFailure(String),

    #[error(
        "Stale Cookie: {0}. Copy a fresh cookie from the browser and update the data source"
    )]
    StaleCookie(String),

    #[error("Login Failed: {0}")]
    LoginFailed(String),

    #[error("Timeout: attempt exceeded {0}s")]
    Timeout(u64),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether a failed attempt with this error may be retried.
    /// ---
    /// Only transient connector failures consume a retry.
    /// Credential problems (`StaleCookie`, `LoginFailed`) short-circuit
    /// the attempt loop, as does a stop request.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::ConnectivityFailure(_) | Error::CollectionFailure(_) | Error::Timeout(_)
        )
    }

    /// Stable snake_case kind used in API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Serialization(_) => "serialization",
            Error::NotFound { .. } => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config",
            Error::ChannelComm(_) => "channel_comm",
            Error::Internal(_) => "internal",
            Error::InvalidCronExpression { .. } => "invalid_cron_expression",
            Error::TaskBusy { .. } => "task_busy",
            Error::ConnectivityFailure(_) => "connectivity_failure",
            Error::CollectionFailure(_) => "collection_failure",
            Error::StaleCookie(_) => "stale_cookie",
            Error::LoginFailed(_) => "login_failed",
            Error::Timeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
        }
    }

    pub fn not_found(resource_type: &str, resource_id: impl ToString) -> Self {
        Error::NotFound {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        }
    }
}
