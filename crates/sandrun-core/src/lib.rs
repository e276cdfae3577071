//! Core library for running untrusted code in remote, disposable sandboxes.
//!
//! This crate turns a code snippet, a dependency manifest, and a set of
//! resource limits into a single one-shot execution on a remote host: the
//! code and manifest are materialized inside an ephemeral, resource-bounded
//! container, the declared dependencies are installed, the code runs, and
//! the captured stdout/stderr come back as plain text.
//!
//! The moving parts:
//!
//! - **Transport**: authenticated SSH command execution with a lazily
//!   established, reused session ([`transport`])
//! - **Manifest**: pyproject-style dependency/project description consumed
//!   by the container's installer ([`manifest`])
//! - **Command assembly**: safe embedding of arbitrary untrusted text into
//!   one shell invocation with resource-limit flags ([`command`])
//! - **Sandbox orchestration**: ties the above together per call
//!   ([`sandbox`])
//! - **Configuration**: YAML config surface with environment-variable
//!   resolution for secrets ([`config`])
//!
//! Everything is synchronous and blocking: `run_code` does not return until
//! the remote command finishes, fails, or exceeds its time budget.

pub mod command;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod sandbox;
pub mod transport;

pub use command::ResourceLimits;
pub use config::{load_config, SandrunConfig};
pub use errors::SandboxError;
pub use manifest::{Dependency, PyprojectManifest};
pub use sandbox::{
    CodeOutput, ConnectionParams, RunOptions, Sandbox, SandboxBuilder, SharedTransport,
    DEFAULT_IMAGE,
};
pub use transport::{AuthMethod, ExecOutput, RemoteTransport, SshTransport};
