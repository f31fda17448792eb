use thiserror::Error;

/// A failed read of the remote game state. Always transient: the poll loop
/// keeps the previous view and tries again on the next tick.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("state request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("state source responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid state payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed game state: {0}")]
    Malformed(String),
}

/// Why a user action did not go through. Surfaced to the user once; the view
/// is left untouched.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Precondition(String),
    #[error("action rejected: {0}")]
    Rejected(String),
    #[error("action relay unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ActionError {
    pub(crate) fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer socket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode peer message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("local store failed: {0}")]
    Storage(#[from] sled::Error),
    #[error("persistence request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to encode stored record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("persistence endpoint refused update: {0}")]
    Rejected(String),
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown persistence target {0:?}; expected none, http or sled:<path>")]
    UnknownPersistence(String),
    #[error("could not expand path {path:?}: {reason}")]
    Path { path: String, reason: String },
    #[error("{name} interval must be greater than zero")]
    ZeroInterval { name: &'static str },
    #[error("wallet id must not be empty")]
    EmptyWallet,
}
