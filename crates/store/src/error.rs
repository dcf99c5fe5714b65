/// Persistence failures, surfaced to the user as-is and never retried
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no user is signed in")]
    Unauthenticated,
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored data could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("remote store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store returned {status}: {message}")]
    Status { status: u16, message: String },
}
