use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {store}: {message}")]
    Store { store: String, message: String },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Browser launch failed: {0}")]
    RenderLaunch(String),

    #[error("Browser disconnected")]
    RenderDisconnected,

    #[error("Render pool is shut down")]
    RenderClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        AppError::Parse {
            message: message.into(),
        }
    }

    /// True for errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::InvalidQuery(_) | AppError::Validation(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
