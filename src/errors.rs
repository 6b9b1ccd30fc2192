use thiserror::Error;

/// Message used whenever an operation needs a credential that is missing.
pub const TOKEN_NOT_SET: &str = "token not set";

#[derive(Error, Debug)]
pub enum AppError {
    /// No credential, or the credential lacks the numeric account id.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network failure, timeout, undecodable body or non-2xx status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with a structured `error` object.
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The player subprocess failed to spawn or misbehaved.
    #[error("Process error: {0}")]
    Process(String),

    /// A newer `play` request replaced this one before it could start.
    #[error("Playback request superseded")]
    Superseded,

    /// A track that cannot be fetched at all, e.g. one without a source URL.
    #[error("Download error: {0}")]
    Download(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn token_not_set() -> Self {
        AppError::Auth(TOKEN_NOT_SET.to_string())
    }

    /// True for failures caused by a missing or unusable credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
