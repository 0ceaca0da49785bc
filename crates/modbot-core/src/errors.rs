/// Core error type for the moderation agent.
///
/// Adapter crates should map their specific errors into this type so the
/// pipeline can classify failures consistently (startup precondition vs.
/// per-message denial).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
