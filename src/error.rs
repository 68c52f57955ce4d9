use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a process table snapshot.
///
/// Always transient: the sampler logs it, skips the iteration and tries
/// again on the next tick.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Process table unreadable: {0}")]
    TableUnreadable(String),

    #[error("Snapshot read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Previous snapshot read is still in flight")]
    ReaderBusy,

    #[error("Snapshot reader task failed: {0}")]
    Task(String),
}

/// Stored data format does not match what this build understands.
///
/// Only raised while opening a store; it is fatal at startup.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unsupported store schema version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: i64, supported: i64 },

    #[error("Unrecognized store file: {0}")]
    Unrecognized(String),
}

/// Durability or I/O failure in the sample store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl StoreError {
    pub fn invalid_value<S: Into<String>>(msg: S) -> Self {
        StoreError::InvalidValue(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    NotFound,
    PermissionDenied,
    Unsupported,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionErrorKind::NotFound => "not found",
            ActionErrorKind::PermissionDenied => "permission denied",
            ActionErrorKind::Unsupported => "unsupported",
        };
        f.write_str(label)
    }
}

/// A process-control request the operating system refused.
///
/// Never affects sampler state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Process action on PID {pid} failed ({kind}): {message}")]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub pid: u32,
    pub message: String,
}

impl ActionError {
    pub fn not_found<S: Into<String>>(pid: u32, msg: S) -> Self {
        Self {
            kind: ActionErrorKind::NotFound,
            pid,
            message: msg.into(),
        }
    }

    pub fn permission_denied<S: Into<String>>(pid: u32, msg: S) -> Self {
        Self {
            kind: ActionErrorKind::PermissionDenied,
            pid,
            message: msg.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(pid: u32, msg: S) -> Self {
        Self {
            kind: ActionErrorKind::Unsupported,
            pid,
            message: msg.into(),
        }
    }
}

/// Misuse of the sampler lifecycle.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Sampler is already running")]
    AlreadyRunning,

    #[error("Sampler is not running")]
    NotRunning,

    #[error("Invalid sampling interval {0:?}")]
    InvalidInterval(Duration),

    #[error("Failed to build sampler runtime: {0}")]
    Runtime(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write { path: String, source: io::Error },

    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),

    #[error("Could not determine {0} directory")]
    NoDirectory(&'static str),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum ProcwatchError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<SchemaError> for ProcwatchError {
    fn from(err: SchemaError) -> Self {
        ProcwatchError::Store(StoreError::Schema(err))
    }
}

/// Result type alias for procwatch
pub type Result<T> = std::result::Result<T, ProcwatchError>;
