//! Launcher error types.
//!
//! Every error that can abort startup renders as a single
//! `[<section>] <message>` line on stderr. Configuration problems use the
//! `[conf]` section tag; listener, privilege, and pidfile problems name the
//! section or subsystem they came from.

use thiserror::Error;

/// Top-level error for the launcher.
#[derive(Debug, Error)]
pub enum BrimError {
    /// Configuration parse, unknown option, or missing required value.
    #[error("[conf] {0}")]
    Config(String),

    /// Listener acquisition failed after the retry budget.
    #[error("[{section}] could not bind to {addr}: {message}")]
    Bind {
        section: String,
        addr: String,
        message: String,
    },

    /// User/group switch failed.
    #[error("[brim] {0}")]
    Privilege(String),

    /// Pidfile exists with a live process, or cannot be written.
    #[error("[brim] pid file {path}: {message}")]
    Pidfile { path: String, message: String },

    /// A factory's `parse_conf` hook rejected the configuration. The hook's
    /// message is surfaced unchanged.
    #[error("[{section}] {message}")]
    FactoryInit { section: String, message: String },

    /// Post-fork failure inside a worker. Logged, never fatal to the parent.
    #[error("{0}")]
    HandlerRuntime(String),

    /// Supervisor-level I/O failure (fork, pipe, wait).
    #[error("[brim] {0}")]
    Supervisor(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrimError>;

impl From<crate::config::ConfError> for BrimError {
    fn from(err: crate::config::ConfError) -> Self {
        BrimError::Config(err.to_string())
    }
}
