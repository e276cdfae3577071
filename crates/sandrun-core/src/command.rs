//! Assembly of the one-shot remote shell invocation.
//!
//! Everything a single run needs happens inside one `docker run ... /bin/sh
//! -c '...'` string: the environment exports, the scratch directory, the two
//! heredoc-written files (manifest and script), and the `uv run` itself. The
//! container is resource-bounded through discrete flags and removed
//! automatically when the command finishes, taking the scratch files with
//! it.
//!
//! The manifest and the code are untrusted text. Both are embedded inside a
//! single-quoted outer argument after single-quote neutralization, and the
//! heredoc markers are quoted so `$`, backticks and friends stay literal.

use serde::{Deserialize, Serialize};

/// Resource ceilings applied to one sandboxed execution. Every field has a
/// documented default; defaults are resolved before command assembly, never
/// left unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    /// CPU shares handed to the container.
    pub cpus: f64,
    /// Memory ceiling in megabytes.
    pub memory_mb: u64,
    /// Maximum number of processes inside the container.
    pub processes: u32,
    /// Read-throughput ceiling on the host's primary block device, e.g. "10mb".
    pub read_rate: String,
    /// Write-throughput ceiling on the host's primary block device.
    pub write_rate: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_mb: 512,
            processes: 100,
            read_rate: "10mb".to_string(),
            write_rate: "10mb".to_string(),
        }
    }
}

/// Neutralize single quotes so `text` can live inside a single-quoted shell
/// argument: each `'` becomes `'\''` (close quote, escaped quote, reopen).
pub(crate) fn shell_escape_single_quotes(text: &str) -> String {
    text.replace('\'', "'\\''")
}

/// Render `export K='V'` assignments joined by ` && ` so each export must
/// succeed before the next runs. An empty mapping renders nothing.
pub(crate) fn render_env_exports(environment: &[(String, String)]) -> String {
    environment
        .iter()
        .map(|(k, v)| format!("export {}='{}'", k, v))
        .collect::<Vec<_>>()
        .join(" && ")
}

/// Assemble the full remote invocation for one run.
///
/// `workdir` is the per-call scratch directory name under `/tmp` inside the
/// container; `manifest` and `code` are embedded verbatim after escaping.
pub(crate) fn build_run_command(
    image: &str,
    workdir: &str,
    manifest: &str,
    code: &str,
    limits: &ResourceLimits,
    environment: &[(String, String)],
) -> String {
    let manifest_escaped = shell_escape_single_quotes(manifest);
    let code_escaped = shell_escape_single_quotes(code);
    let exports = if environment.is_empty() {
        String::new()
    } else {
        format!("{} && \\\n", render_env_exports(environment))
    };
    format!(
        "docker run --pids-limit {processes} --cpus {cpus} -m {memory}m \
--device-read-bps=/dev/sda:{read_rate} --device-write-bps=/dev/sda:{write_rate} \
--rm {image} /bin/sh -c '\n\
{exports}\
mkdir -p /tmp/{workdir} && \\\n\
cat > /tmp/{workdir}/pyproject.toml << \"EOF\"\n\
{manifest}\n\
EOF\n\
cat > /tmp/{workdir}/script.py << \"EOF\"\n\
{code}\n\
EOF\n\
cd /tmp/{workdir}/ && \\\n\
uv run script.py\n\
'",
        processes = limits.processes,
        cpus = limits.cpus,
        memory = limits.memory_mb,
        read_rate = limits.read_rate,
        write_rate = limits.write_rate,
        image = image,
        exports = exports,
        workdir = workdir,
        manifest = manifest_escaped,
        code = code_escaped,
    )
}
