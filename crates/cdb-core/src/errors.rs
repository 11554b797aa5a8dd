/// Core error type for the bridge.
///
/// Adapter crates map their specific errors into this type so the core can
/// handle failures consistently (reconnect vs skip-and-log).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Malformed live envelope. Fatal to the current frame only; the link
    /// treats it as a fault and reconnects.
    #[error("format error: {0}")]
    Format(String),

    /// The streaming connection was closed by the peer.
    #[error("connection closed")]
    Closed,

    #[error("connection error: {0}")]
    Connection(String),

    /// A remote post/edit/delete/upload failed. Never retried by the core.
    #[error("external error: {0}")]
    External(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
