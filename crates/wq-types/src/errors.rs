use thiserror::Error;

/// Main error type for the winequal toolkit
#[derive(Error, Debug)]
pub enum WqError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteServiceError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Missing or invalid configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .keys.join(", "))]
    Missing { keys: Vec<String> },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("profile '{profile}' not found in {path}")]
    UnknownProfile { profile: String, path: String },

    #[error("hardware tier '{name}' does not exist")]
    UnknownHardwareTier { name: String },

    #[error("unknown hyperparameter '{name}' for model {model}")]
    UnknownParameter { name: String, model: String },
}

/// The API key was rejected
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API key rejected by {url} (HTTP {status})")]
    Rejected { url: String, status: u16 },
}

/// Non-2xx responses and transport failures from remote APIs
#[derive(Error, Debug)]
pub enum RemoteServiceError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("no project named '{name}' for owner {owner}")]
    ProjectNotFound { name: String, owner: String },

    #[error("{count} projects named '{name}' for owner {owner}")]
    AmbiguousProject { name: String, owner: String, count: usize },
}

/// Dataset-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Column not found: {name}")]
    ColumnNotFound { name: String },

    #[error("Column {name} is not numeric")]
    NotNumeric { name: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Empty partition: {message}")]
    EmptyPartition { message: String },

    #[error("Shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("Numerical failure: {message}")]
    NumericalFailure { message: String },
}

/// Result type alias for winequal operations
pub type WqResult<T> = Result<T, WqError>;

impl RemoteServiceError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($key:expr, $($arg:tt)*) => {
        $crate::WqError::Config($crate::ConfigError::Invalid {
            key: $key.to_string(),
            message: format!($($arg)*),
        })
    };
}

/// Macro for creating data format errors
#[macro_export]
macro_rules! data_error {
    ($($arg:tt)*) => {
        $crate::WqError::Data($crate::DataError::InvalidFormat {
            message: format!($($arg)*),
        })
    };
}
