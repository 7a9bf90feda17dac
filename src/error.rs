//! Crate error types.
//!
//! Only setup-level problems surface as [`Error`]. Per-event problems (an unmapped code,
//! a single failed injection call, a malformed line in a macro file) are logged and
//! skipped by the component that meets them.

use std::path::PathBuf;

use crate::event::Channel;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an injection backend.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// The backend could not connect to the display/session.
    #[error("input injection unavailable: {0}")]
    Unavailable(String),
    /// A single press/release/move call failed.
    #[error("injection call failed: {0}")]
    Call(String),
    /// The backend has no equivalent for this code.
    #[error("code {0} is not supported by this backend")]
    Unsupported(String),
}

/// A key name that is not in the named-key table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key name `{0}`")]
pub struct UnknownKeyName(pub String);

/// Top-level error for setup, loading and orchestration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The backend could not be connected at all.
    #[error(transparent)]
    Backend(#[from] InjectError),

    #[error("could not acquire an injector for the {channel} channel: {source}")]
    InjectorUnavailable {
        channel: Channel,
        #[source]
        source: InjectError,
    },

    #[error("invalid repeat count {0} (use a positive count, or -1 for infinite)")]
    InvalidRepeatCount(i64),

    #[error("scheduler for the {0} channel is stopped")]
    SchedulerStopped(Channel),

    #[error("scheduler for the {0} channel was already activated")]
    AlreadyActivated(Channel),

    #[error("{channel} event #{index} at {offset_ms}ms goes back in time (previous {previous_ms}ms)")]
    OutOfOrder {
        channel: Channel,
        index: usize,
        offset_ms: u128,
        previous_ms: u128,
    },

    #[error("could not create macro directory {path}: {source}")]
    MacroDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("macro `{0}` not found")]
    MacroNotFound(String),

    #[error("macro `{0}` already exists")]
    MacroExists(String),

    #[error("invalid macro name `{0}`")]
    InvalidMacroName(String),

    #[error(transparent)]
    UnknownKey(#[from] UnknownKeyName),

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("signal handlers already installed")]
    HooksInstalled,

    #[error("failed to install termination hooks: {0}")]
    Hooks(String),
}
