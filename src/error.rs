//! Error types for thumb.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for thumb.
#[derive(Error, Debug)]
pub enum Error {
    /// No prompt was supplied before the first generation
    #[error("Missing prompt: at least one prompt is required")]
    MissingPrompt,

    /// Cases with different variable counts in one matrix
    #[error("Inconsistent cases: expected {expected} variables per case, found {found}")]
    InconsistentCases { expected: usize, found: usize },

    /// Run count that is not a positive integer
    #[error("Invalid run count: {0}")]
    InvalidRuns(String),

    /// Snapshot requested by `load` does not exist
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Snapshot with an extension we cannot read
    #[error("Bad file type: {path} (expected .json or .csv)")]
    BadFileType { path: String },

    /// Feedback aimed at a run that is not in the matrix
    #[error("Run not found: {prompt_id}/{case_id}/{model_id}/{run_id}")]
    RunNotFound {
        prompt_id: String,
        case_id: String,
        model_id: String,
        run_id: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider/API errors
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),

    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] Box<csv::Error>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an invalid run count error.
    pub fn invalid_runs(message: impl Into<String>) -> Self {
        Self::InvalidRuns(message.into())
    }

    pub fn file_not_found(path: impl AsRef<std::path::Path>) -> Self {
        Self::FileNotFound {
            path: path.as_ref().display().to_string(),
        }
    }

    pub fn bad_file_type(path: impl AsRef<std::path::Path>) -> Self {
        Self::BadFileType {
            path: path.as_ref().display().to_string(),
        }
    }

    /// Whether the error comes from caller-supplied matrix configuration.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingPrompt | Self::InconsistentCases { .. } | Self::InvalidRuns(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Csv(Box::new(value))
    }
}
