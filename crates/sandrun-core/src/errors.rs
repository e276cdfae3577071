//! Error types for the remote sandbox orchestrator.
//!
//! The taxonomy distinguishes where a failure happened, not what the
//! executed code printed: construction-time contract violations, session
//! establishment failures, exceeded time budgets, and mid-call I/O errors.
//! Whatever the sandboxed program itself writes to stderr is never an error
//! here; it comes back as text in the result.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// A construction-time contract violation: missing or duplicate manifest
    /// source, invalid manifest path, or an invalid credential combination.
    /// Never produced by `run_code`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The authenticated session could not be established: unreachable host,
    /// rejected credentials, or a failed handshake.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The time budget expired while waiting for the remote command.
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// An I/O failure mid-call; a session dropped during output capture
    /// surfaces here.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
