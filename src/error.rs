//! Error types for the session driver.
//!
//! One enum per layer: the HTTP API, the persisted session store, the turn
//! controller and configuration loading. Only the binary reaches for
//! `anyhow`.

use std::path::PathBuf;

use crate::session::TurnPhase;

/// Errors talking to the game backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The backend answered with a non-success status.
    #[error("Server returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The body did not match the expected shape.
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },
}

/// Errors reading or writing the persisted session fields.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but is not a flat JSON object of strings.
    #[error("Corrupt session file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unknown session field '{0}', expected threadId, runId or runStatus")]
    UnknownField(String),
}

/// Errors returned by turn controller operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation is only valid while idle.
    #[error("Session is busy ({phase})")]
    Busy { phase: TurnPhase },

    #[error("No conversation yet, start a new game first")]
    NoConversation,

    #[error("No run to poll")]
    NoActiveRun,

    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The controller task has stopped.
    #[error("Session controller is no longer running")]
    ControllerGone,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not determine a data directory for the session file, set QUEST_STATE_PATH")]
    MissingDataDir,
}
