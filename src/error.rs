use thiserror::Error;

/// Transient failures of a single poll. All of them are retried.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("server returned an empty batch")]
    EmptyBatch,
}

impl PollError {
    /// Whether the failure was the client-side request timeout firing
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Transport(e) if e.is_timeout())
    }
}

/// Failures reading or writing the preferences file
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("preferences I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid preferences file: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("could not encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),
}
