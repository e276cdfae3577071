//! Sandbox orchestration: one call in, one disposable remote execution out.
//!
//! A [`Sandbox`] owns a rendered manifest blob and a shared transport. Each
//! `run_code` call resolves the resource-limit defaults, assembles a single
//! self-contained shell invocation (scratch directory, manifest file, script
//! file, dependency install, execution), hands it to the transport, and maps
//! the captured streams straight into a [`CodeOutput`]. No exit status, no
//! truncation, no retries: the result is what the isolated program printed.

use crate::command::{build_run_command, ResourceLimits};
use crate::errors::SandboxError;
use crate::manifest::PyprojectManifest;
use crate::transport::{RemoteTransport, SshTransport};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Container image used when none is configured. Ships `uv`, which installs
/// the manifest's dependencies and runs the script.
pub const DEFAULT_IMAGE: &str = "ghcr.io/astral-sh/uv:alpine";

/// A transport shared between sandboxes. The mutex serializes command
/// execution so several sandboxes can reuse one authenticated session.
pub type SharedTransport = Arc<Mutex<dyn RemoteTransport>>;

/// Captured result of one sandboxed run. Both fields are always present; a
/// program that printed nothing yields empty strings. A crash inside the
/// executed code is not a failure of the orchestrator — it is text in
/// `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeOutput {
    pub output: String,
    pub error: String,
}

/// Per-call options. Every resource limit left unset falls back to the
/// defaults in [`ResourceLimits`] before the command is assembled.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    /// Environment variables exported inside the container, in order.
    pub environment: Vec<(String, String)>,
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
    pub processes: Option<u32>,
    pub read_rate: Option<String>,
    pub write_rate: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Time budget in seconds.
    pub fn timeout_secs(self, secs: f64) -> Self {
        self.timeout(Duration::from_secs_f64(secs))
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    pub fn cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn processes(mut self, processes: u32) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn read_rate(mut self, read_rate: impl Into<String>) -> Self {
        self.read_rate = Some(read_rate.into());
        self
    }

    pub fn write_rate(mut self, write_rate: impl Into<String>) -> Self {
        self.write_rate = Some(write_rate.into());
        self
    }

    fn resolved_limits(&self) -> ResourceLimits {
        let defaults = ResourceLimits::default();
        ResourceLimits {
            cpus: self.cpus.unwrap_or(defaults.cpus),
            memory_mb: self.memory_mb.unwrap_or(defaults.memory_mb),
            processes: self.processes.unwrap_or(defaults.processes),
            read_rate: self.read_rate.clone().unwrap_or(defaults.read_rate),
            write_rate: self.write_rate.clone().unwrap_or(defaults.write_rate),
        }
    }
}

/// Raw connection parameters for the factory path that builds the transport
/// and the sandbox together.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub passphrase: Option<String>,
    pub key_file: Option<PathBuf>,
}

/// Builder for [`Sandbox`]. Exactly one manifest source must be supplied —
/// a ready-made [`PyprojectManifest`] or a path to a manifest file — and
/// exactly one transport source: a shared transport or raw connection
/// parameters.
pub struct SandboxBuilder {
    name: String,
    image: String,
    transport: Option<SharedTransport>,
    connection: Option<ConnectionParams>,
    manifest: Option<PyprojectManifest>,
    manifest_path: Option<PathBuf>,
}

impl SandboxBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: DEFAULT_IMAGE.to_string(),
            transport: None,
            connection: None,
            manifest: None,
            manifest_path: None,
        }
    }

    /// Reuse an already constructed transport; several sandboxes may share
    /// one authenticated session this way.
    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Factory path: build a fresh [`SshTransport`] from raw connection
    /// parameters at `build` time.
    pub fn connection(mut self, params: ConnectionParams) -> Self {
        self.connection = Some(params);
        self
    }

    pub fn manifest(mut self, manifest: PyprojectManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn manifest_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Override the container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn build(self) -> Result<Sandbox, SandboxError> {
        let manifest_text = match (self.manifest, self.manifest_path) {
            (None, None) => {
                return Err(SandboxError::Configuration(
                    "you need to provide either a manifest or the path to a manifest file"
                        .to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(SandboxError::Configuration(
                    "you can provide either a manifest or the path to a manifest file, not both"
                        .to_string(),
                ))
            }
            (Some(manifest), None) => manifest.render(),
            (None, Some(path)) => read_manifest_file(&path)?,
        };
        let transport = match (self.transport, self.connection) {
            (None, None) => {
                return Err(SandboxError::Configuration(
                    "you need to provide either a transport or connection parameters".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(SandboxError::Configuration(
                    "you can provide either a transport or connection parameters, not both"
                        .to_string(),
                ))
            }
            (Some(transport), None) => transport,
            (None, Some(params)) => {
                let transport = SshTransport::new(
                    params.host,
                    params.port,
                    params.username,
                    params.password.as_deref(),
                    params.passphrase.as_deref(),
                    params.key_file.as_deref(),
                )?;
                Arc::new(Mutex::new(transport))
            }
        };
        Ok(Sandbox {
            name: self.name,
            image: self.image,
            manifest_text,
            transport,
        })
    }
}

fn read_manifest_file(path: &Path) -> Result<String, SandboxError> {
    if !path.is_file() {
        return Err(SandboxError::Configuration(format!(
            "invalid manifest path '{}': it either does not exist or is not a file",
            path.display()
        )));
    }
    fs::read_to_string(path).map_err(|e| {
        SandboxError::Configuration(format!(
            "could not read manifest file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// A named, reusable handle for running untrusted code remotely. The
/// manifest text is fixed at construction; each call gets its own scratch
/// directory and its own disposable container.
pub struct Sandbox {
    name: String,
    image: String,
    manifest_text: String,
    transport: SharedTransport,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("manifest_text", &self.manifest_text)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    pub fn builder(name: impl Into<String>) -> SandboxBuilder {
        SandboxBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest_text(&self) -> &str {
        &self.manifest_text
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Execute `code` in a fresh, resource-bounded container on the remote
    /// host and return what it printed. Blocks until the remote command
    /// finishes or the time budget runs out; empty code is legal.
    pub fn run_code(&self, code: &str, options: &RunOptions) -> Result<CodeOutput, SandboxError> {
        let limits = options.resolved_limits();
        // Unique per call so concurrent runs under one sandbox name cannot
        // race on the manifest/script files.
        let workdir = format!("{}-{}", self.name, Uuid::new_v4());
        let command = build_run_command(
            &self.image,
            &workdir,
            &self.manifest_text,
            code,
            &limits,
            &options.environment,
        );
        debug!("sandbox {}: dispatching run in {}", self.name, workdir);
        let mut transport = self.transport.lock().unwrap_or_else(|poisoned| {
            warn!("sandbox {}: transport mutex was poisoned", self.name);
            poisoned.into_inner()
        });
        let result = transport.execute(&command, options.timeout)?;
        Ok(CodeOutput {
            output: result.stdout,
            error: result.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Dependency;
    use crate::transport::ExecOutput;
    use std::io::Write;

    #[derive(Default)]
    struct Recorded {
        commands: Vec<String>,
        timeouts: Vec<Option<Duration>>,
    }

    /// Transport double that records every command instead of dialing out.
    struct RecordingTransport {
        recorded: Arc<Mutex<Recorded>>,
        response: ExecOutput,
    }

    impl RemoteTransport for RecordingTransport {
        fn execute(
            &mut self,
            command: &str,
            timeout: Option<Duration>,
        ) -> Result<ExecOutput, SandboxError> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.commands.push(command.to_string());
            recorded.timeouts.push(timeout);
            Ok(self.response.clone())
        }
    }

    fn recording_sandbox(response: ExecOutput) -> (Sandbox, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let transport = RecordingTransport {
            recorded: Arc::clone(&recorded),
            response,
        };
        let sandbox = Sandbox::builder("sandbox-1")
            .transport(Arc::new(Mutex::new(transport)))
            .manifest(PyprojectManifest::new(
                "test-project",
                vec![Dependency::new("typing-extensions", "<5")],
            ))
            .build()
            .unwrap();
        (sandbox, recorded)
    }

    fn shared_noop_transport() -> SharedTransport {
        Arc::new(Mutex::new(RecordingTransport {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            response: ExecOutput::default(),
        }))
    }

    #[test]
    fn test_builder_requires_a_manifest_source() {
        let err = Sandbox::builder("sandbox-1")
            .transport(shared_noop_transport())
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }

    #[test]
    fn test_builder_rejects_both_manifest_sources() {
        let err = Sandbox::builder("sandbox-1")
            .transport(shared_noop_transport())
            .manifest(PyprojectManifest::default())
            .manifest_file("pyproject.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }

    #[test]
    fn test_builder_rejects_missing_manifest_path() {
        let err = Sandbox::builder("sandbox-1")
            .transport(shared_noop_transport())
            .manifest_file("does-not-exist.toml")
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }

    #[test]
    fn test_builder_reads_manifest_file_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[project]\nname = \"from-file\"\n").unwrap();
        let sandbox = Sandbox::builder("sandbox-1")
            .transport(shared_noop_transport())
            .manifest_file(file.path())
            .build()
            .unwrap();
        assert_eq!(sandbox.manifest_text(), "[project]\nname = \"from-file\"\n");
    }

    #[test]
    fn test_builder_renders_manifest_object_at_build_time() {
        let manifest = PyprojectManifest::new(
            "test-project",
            vec![Dependency::new("typing-extensions", "<5")],
        );
        let rendered = manifest.render();
        let sandbox = Sandbox::builder("sandbox-1")
            .transport(shared_noop_transport())
            .manifest(manifest)
            .build()
            .unwrap();
        assert_eq!(sandbox.manifest_text(), rendered);
    }

    #[test]
    fn test_builder_requires_a_transport_source() {
        let err = Sandbox::builder("sandbox-1")
            .manifest(PyprojectManifest::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }

    #[test]
    fn test_factory_path_builds_transport_from_params() {
        let sandbox = Sandbox::builder("sandbox-1")
            .connection(ConnectionParams {
                host: "0.0.0.0".to_string(),
                port: 22,
                username: "test".to_string(),
                password: Some("test".to_string()),
                ..Default::default()
            })
            .manifest(PyprojectManifest::default())
            .build()
            .unwrap();
        assert_eq!(sandbox.name(), "sandbox-1");
        assert_eq!(sandbox.image(), DEFAULT_IMAGE);
    }

    #[test]
    fn test_factory_path_rejects_bad_credentials() {
        let err = Sandbox::builder("sandbox-1")
            .connection(ConnectionParams {
                host: "0.0.0.0".to_string(),
                port: 22,
                username: "test".to_string(),
                ..Default::default()
            })
            .manifest(PyprojectManifest::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Configuration(_)));
    }

    #[test]
    fn test_run_code_maps_streams_to_output_and_error() {
        let (sandbox, _) = recording_sandbox(ExecOutput {
            stdout: "hello world!\n".to_string(),
            stderr: "".to_string(),
        });
        let result = sandbox
            .run_code("print('hello world!')", &RunOptions::new())
            .unwrap();
        assert_eq!(result.output, "hello world!\n");
        assert_eq!(result.error, "");
    }

    #[test]
    fn test_run_code_with_options_assembles_documented_command() {
        let (sandbox, recorded) = recording_sandbox(ExecOutput::default());
        let options = RunOptions::new()
            .env("OPENAI_API_KEY", "test-key")
            .env("PYTHONBUFFERED", "1")
            .cpus(1.5)
            .memory_mb(100)
            .processes(10)
            .read_rate("1mb")
            .write_rate("2mb");
        sandbox.run_code("print('hello world!')", &options).unwrap();

        let recorded = recorded.lock().unwrap();
        let command = &recorded.commands[0];
        assert!(command
            .contains("export OPENAI_API_KEY='test-key' && export PYTHONBUFFERED='1'"));
        assert!(command.contains(
            "docker run --pids-limit 10 --cpus 1.5 -m 100m \
--device-read-bps=/dev/sda:1mb --device-write-bps=/dev/sda:2mb"
        ));
    }

    #[test]
    fn test_run_code_without_options_uses_defaults() {
        let (sandbox, recorded) = recording_sandbox(ExecOutput::default());
        sandbox
            .run_code("print('hello world!')", &RunOptions::new())
            .unwrap();

        let recorded = recorded.lock().unwrap();
        let command = &recorded.commands[0];
        assert!(command.contains(
            "docker run --pids-limit 100 --cpus 1 -m 512m \
--device-read-bps=/dev/sda:10mb --device-write-bps=/dev/sda:10mb"
        ));
        assert!(!command.contains("export"));
    }

    #[test]
    fn test_run_code_forwards_timeout_unchanged() {
        let (sandbox, recorded) = recording_sandbox(ExecOutput::default());
        sandbox
            .run_code("", &RunOptions::new().timeout_secs(12.5))
            .unwrap();
        sandbox.run_code("", &RunOptions::new()).unwrap();

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.timeouts[0], Some(Duration::from_secs_f64(12.5)));
        assert_eq!(recorded.timeouts[1], None);
    }

    #[test]
    fn test_run_code_uses_a_unique_scratch_directory_per_call() {
        let (sandbox, recorded) = recording_sandbox(ExecOutput::default());
        sandbox.run_code("pass", &RunOptions::new()).unwrap();
        sandbox.run_code("pass", &RunOptions::new()).unwrap();

        let recorded = recorded.lock().unwrap();
        let dir_of = |command: &str| {
            let start = command.find("mkdir -p /tmp/").unwrap() + "mkdir -p /tmp/".len();
            let end = command[start..].find(' ').unwrap() + start;
            command[start..end].to_string()
        };
        let first = dir_of(&recorded.commands[0]);
        let second = dir_of(&recorded.commands[1]);
        assert!(first.starts_with("sandbox-1-"));
        assert!(second.starts_with("sandbox-1-"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_run_code_embeds_quoted_code_safely() {
        let (sandbox, recorded) = recording_sandbox(ExecOutput::default());
        sandbox
            .run_code("print('it''s fine')", &RunOptions::new())
            .unwrap();

        let recorded = recorded.lock().unwrap();
        assert!(recorded.commands[0].contains("print('\\''it'\\'''\\''s fine'\\'')"));
    }

    #[test]
    fn test_sandboxes_can_share_one_transport() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let shared: SharedTransport = Arc::new(Mutex::new(RecordingTransport {
            recorded: Arc::clone(&recorded),
            response: ExecOutput::default(),
        }));
        let first = Sandbox::builder("sandbox-1")
            .transport(Arc::clone(&shared))
            .manifest(PyprojectManifest::default())
            .build()
            .unwrap();
        let second = Sandbox::builder("sandbox-2")
            .transport(shared)
            .manifest(PyprojectManifest::default())
            .build()
            .unwrap();
        first.run_code("pass", &RunOptions::new()).unwrap();
        second.run_code("pass", &RunOptions::new()).unwrap();
        assert_eq!(recorded.lock().unwrap().commands.len(), 2);
    }
}
