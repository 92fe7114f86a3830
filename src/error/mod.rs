mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use crate::coordination::CoordinationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FairlockError {
    #[error("No active coordination session for lock {root}")]
    NoSession { root: String },

    #[error("Lock {root} is already held or being acquired by this handle")]
    Deadlock { root: String },

    #[error("Lock {root} is not held by this handle")]
    NotLocked { root: String },

    #[error("Lock node '{node}' does not end in a sequence number")]
    MalformedSequence { node: String },

    #[error("Lock node {node} disappeared while queued")]
    NodeVanished { node: String },

    #[error("Invalid lock path: {0}")]
    InvalidPath(String),

    #[error("Acquisition of lock {root} was cancelled after {waited_secs:.3}s")]
    Cancelled { root: String, waited_secs: f64 },

    #[error("Timed out after {waited_secs:.3}s waiting for lock {root}")]
    Timeout { root: String, waited_secs: f64 },

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FairlockError {
    /// True when the failure means the session (and with it every ephemeral
    /// node it owned) is gone.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            FairlockError::Coordination(CoordinationError::SessionExpired)
        )
    }
}

pub type Result<T> = std::result::Result<T, FairlockError>;
