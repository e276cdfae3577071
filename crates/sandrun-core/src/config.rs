//! YAML configuration for sandboxes.
//!
//! This is the declarative surface the CLI consumes: connection parameters,
//! a manifest source (file path or inline), an optional image override, and
//! optional default resource limits. Secret values may reference environment
//! variables as `${VAR}`; references are resolved when the configuration is
//! turned into a [`Sandbox`], so config files never need to carry plaintext
//! credentials.

use crate::errors::SandboxError;
use crate::manifest::PyprojectManifest;
use crate::sandbox::{ConnectionParams, RunOptions, Sandbox, DEFAULT_IMAGE};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandrunConfig {
    /// Sandbox name, used as the scratch-directory prefix on the remote
    /// host; keep it filesystem- and shell-safe.
    pub name: String,
    #[serde(default = "default_image")]
    pub image: String,
    pub connection: ConnectionConfig,
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    22
}

/// Manifest source: exactly one of `path` or `inline`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub inline: Option<PyprojectManifest>,
}

/// Default resource limits applied to every run launched from this
/// configuration; per-call options still override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub processes: Option<u32>,
    #[serde(default)]
    pub read_rate: Option<String>,
    #[serde(default)]
    pub write_rate: Option<String>,
}

impl LimitsConfig {
    /// Seed [`RunOptions`] with the configured defaults.
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new();
        options.cpus = self.cpus;
        options.memory_mb = self.memory_mb;
        options.processes = self.processes;
        options.read_rate = self.read_rate.clone();
        options.write_rate = self.write_rate.clone();
        options
    }
}

/// Resolve a `${VAR}` reference against the process environment; plain
/// values pass through untouched.
fn resolve_env(value: &str) -> Result<String, SandboxError> {
    match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        Some(var) => env::var(var).map_err(|_| {
            SandboxError::Configuration(format!(
                "environment variable '{}' referenced by the configuration is not set",
                var
            ))
        }),
        None => Ok(value.to_string()),
    }
}

impl SandrunConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, SandboxError> {
        serde_yaml::from_str(text)
            .map_err(|e| SandboxError::Configuration(format!("invalid configuration: {}", e)))
    }

    /// Turn the configuration into a ready [`Sandbox`], resolving `${VAR}`
    /// secret references and validating the manifest source.
    pub fn into_sandbox(self) -> Result<Sandbox, SandboxError> {
        let password = self
            .connection
            .password
            .as_deref()
            .map(resolve_env)
            .transpose()?;
        let passphrase = self
            .connection
            .passphrase
            .as_deref()
            .map(resolve_env)
            .transpose()?;
        let params = ConnectionParams {
            host: self.connection.host,
            port: self.connection.port,
            username: self.connection.username,
            password,
            passphrase,
            key_file: self.connection.key_file,
        };
        let mut builder = Sandbox::builder(self.name)
            .image(self.image)
            .connection(params);
        builder = match (self.manifest.path, self.manifest.inline) {
            (Some(path), None) => builder.manifest_file(path),
            (None, Some(manifest)) => builder.manifest(manifest),
            // Let the sandbox builder report the neither/both violations
            // with its own wording.
            (Some(path), Some(manifest)) => builder.manifest_file(path).manifest(manifest),
            (None, None) => builder,
        };
        builder.build()
    }
}

/// Load a configuration file and build the sandbox it describes.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SandrunConfig, SandboxError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| {
        SandboxError::Configuration(format!(
            "could not read configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;
    SandrunConfig::from_yaml(&text)
}
