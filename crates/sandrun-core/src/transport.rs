//! Authenticated remote command execution over SSH.
//!
//! A transport owns one authenticated session, established lazily on the
//! first `execute` call and reused for the transport's lifetime. Commands
//! are handed over as fully assembled shell strings; this layer performs no
//! escaping or interpretation of their content, and it does not surface the
//! remote exit status. It only distinguishes "could not run the command"
//! (connection or timeout failures) from "ran it, here is what it printed".

use crate::errors::SandboxError;
use log::debug;
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Captured output of one remote command. Both fields are always present;
/// a silent command yields empty strings.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam between the sandbox orchestrator and the wire. Production code uses
/// [`SshTransport`]; tests substitute a recording implementation.
pub trait RemoteTransport: Send {
    /// Run `command` on the remote host and capture its full stdout/stderr,
    /// waiting at most `timeout` if given. Output is returned even when the
    /// remote command exits non-zero.
    fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SandboxError>;
}

/// The authentication mode selected at construction time. Exactly one mode
/// is ever active for a given transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Plain password authentication.
    Password(String),
    /// Private-key authentication; the passphrase unlocks the key file.
    KeyFile { path: PathBuf, passphrase: String },
}

impl AuthMethod {
    /// Resolve the credential combination into exactly one mode.
    ///
    /// A passphrase only makes sense together with a key file. When a
    /// passphrase arrives without one, a supplied password takes over as the
    /// sole secret; with no password either, the combination is rejected.
    pub fn select(
        password: Option<&str>,
        passphrase: Option<&str>,
        key_file: Option<&Path>,
    ) -> Result<Self, SandboxError> {
        match (password, passphrase) {
            (None, None) => Err(SandboxError::Configuration(
                "you must provide a password or a key passphrase".to_string(),
            )),
            (Some(password), None) => Ok(AuthMethod::Password(password.to_string())),
            (_, Some(passphrase)) => match key_file {
                Some(path) => Ok(AuthMethod::KeyFile {
                    path: path.to_path_buf(),
                    passphrase: passphrase.to_string(),
                }),
                None => match password {
                    Some(password) => Ok(AuthMethod::Password(password.to_string())),
                    None => Err(SandboxError::Configuration(
                        "a passphrase requires the file where the private key is stored"
                            .to_string(),
                    )),
                },
            },
        }
    }
}

/// SSH transport holding one lazily established, persistent session.
///
/// There is no reconnect-per-call and no automatic reconnection: a session
/// dropped mid-call surfaces as an I/O failure from the capture step.
/// Concurrent `execute` calls against one instance are prevented by the
/// `&mut self` receiver; share an instance through a mutex.
pub struct SshTransport {
    host: String,
    port: u16,
    username: String,
    auth: AuthMethod,
    session: Option<Session>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SshTransport {
    /// Build a transport from raw connection parameters, validating the
    /// credential combination (see [`AuthMethod::select`]). No network
    /// traffic happens here; the session is established on first use.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: Option<&str>,
        passphrase: Option<&str>,
        key_file: Option<&Path>,
    ) -> Result<Self, SandboxError> {
        let auth = AuthMethod::select(password, passphrase, key_file)?;
        Ok(Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            session: None,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth_method(&self) -> &AuthMethod {
        &self.auth
    }

    /// Whether the authenticated session has been established.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Disconnect and drop the session, if any. A later `execute` call will
    /// establish a fresh one.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("closing SSH session to {}:{}", self.host, self.port);
            let _ = session.disconnect(None, "closing", None);
        }
    }

    fn connect(&self) -> Result<Session, SandboxError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).map_err(|e| {
            SandboxError::Connection(format!(
                "could not reach {}:{}: {}",
                self.host, self.port, e
            ))
        })?;
        let mut session = Session::new()
            .map_err(|e| SandboxError::Connection(format!("session setup failed: {}", e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| SandboxError::Connection(format!("SSH handshake failed: {}", e)))?;
        match &self.auth {
            AuthMethod::Password(password) => {
                session.userauth_password(&self.username, password)
            }
            AuthMethod::KeyFile { path, passphrase } => {
                session.userauth_pubkey_file(&self.username, None, path, Some(passphrase))
            }
        }
        .map_err(|e| {
            SandboxError::Connection(format!(
                "authentication failed for {}@{}: {}",
                self.username, self.host, e
            ))
        })?;
        debug!(
            "established SSH session to {}@{}:{}",
            self.username, self.host, self.port
        );
        Ok(session)
    }

    fn ensure_connected(&mut self) -> Result<&Session, SandboxError> {
        if self.session.is_none() {
            let session = self.connect()?;
            self.session = Some(session);
        }
        match self.session.as_ref() {
            Some(session) => Ok(session),
            None => Err(SandboxError::Connection("session unavailable".to_string())),
        }
    }
}

impl RemoteTransport for SshTransport {
    fn execute(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, SandboxError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let session = self.ensure_connected()?;
        // libssh2 takes the budget in milliseconds; 0 blocks indefinitely.
        let millis = timeout
            .map(|t| t.as_millis().min(u32::MAX as u128) as u32)
            .unwrap_or(0);
        session.set_timeout(millis);

        let map_err = |e: std::io::Error| match (deadline, timeout) {
            (Some(d), Some(t)) if Instant::now() >= d => SandboxError::Timeout(t),
            _ => SandboxError::Io(e),
        };

        let mut channel = session
            .channel_session()
            .map_err(|e| map_err(std::io::Error::from(e)))?;
        channel
            .exec(command)
            .map_err(|e| map_err(std::io::Error::from(e)))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(map_err)?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(map_err)?;
        // The exit status is deliberately not inspected; failures inside the
        // remote command are reported through its captured stderr.
        let _ = channel.wait_close();

        Ok(ExecOutput { stdout, stderr })
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        self.close();
    }
}
