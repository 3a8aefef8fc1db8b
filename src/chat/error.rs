use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to open event stream: {0}")]
    ChannelSetup(String),

    #[error("Server reported failure: {0}")]
    Rejected(String),

    #[error("Session is no longer running")]
    SessionClosed,
}
