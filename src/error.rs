use thiserror::Error;

/// Error taxonomy shared by every pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Provider or narrative service unreachable, timed out, or answered with a non-2xx status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed provider payload, unusable artifact contents, or no data for the day.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error at {path}: {message}")]
    Persistence { path: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn persistence(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        PipelineError::Persistence {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Only transport failures are worth retrying without changed input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Transport(_) => "transport",
            PipelineError::Validation(_) => "validation",
            PipelineError::Persistence { .. } => "persistence",
            PipelineError::Configuration(_) => "configuration",
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Configuration(format!("invalid TOML: {err}"))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Persistence {
            path: "mirror".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
