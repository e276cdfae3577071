use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, LevelFilter};
use sandrun_core::{load_config, RunOptions};
use std::fs;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "sandrun",
    version = "0.1.0",
    about = "Run untrusted code in remote, disposable, resource-bounded sandboxes"
)]
struct Cli {
    #[clap(
        long,
        short,
        default_value = "sandrun.yaml",
        help = "Path to the sandbox configuration file"
    )]
    config: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a script inside the remote sandbox and print what it printed
    Run {
        /// Script file to execute, or '-' to read the code from stdin
        script: PathBuf,

        #[clap(long, help = "Time budget in seconds; waits indefinitely if omitted")]
        timeout: Option<f64>,

        #[clap(
            long = "env",
            value_parser = parse_env_pair,
            help = "Environment variable as NAME=VALUE (repeatable)"
        )]
        env: Vec<(String, String)>,

        #[clap(long, help = "CPU shares for the container")]
        cpus: Option<f64>,

        #[clap(long, help = "Memory ceiling in megabytes")]
        memory: Option<u64>,

        #[clap(long, help = "Maximum number of processes")]
        processes: Option<u32>,

        #[clap(long, help = "Read-throughput ceiling, e.g. 10mb")]
        read_rate: Option<String>,

        #[clap(long, help = "Write-throughput ceiling, e.g. 10mb")]
        write_rate: Option<String>,

        #[clap(long, help = "Emit the result as a JSON record")]
        json: bool,
    },
    /// Validate the configuration and render the manifest it would ship
    Check,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn read_code(script: &PathBuf) -> Result<String> {
    if script.as_os_str() == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read code from stdin")?;
        Ok(code)
    } else {
        fs::read_to_string(script)
            .with_context(|| format!("failed to read script '{}'", script.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load configuration '{}'", cli.config))?;

    match cli.command {
        Commands::Check => {
            let sandbox = config.into_sandbox()?;
            println!("sandbox '{}' on image {}", sandbox.name(), sandbox.image());
            println!("{}", sandbox.manifest_text());
            Ok(())
        }
        Commands::Run {
            script,
            timeout,
            env,
            cpus,
            memory,
            processes,
            read_rate,
            write_rate,
            json,
        } => {
            let code = read_code(&script)?;
            let mut options = config
                .limits
                .as_ref()
                .map(|limits| limits.run_options())
                .unwrap_or_else(RunOptions::new);
            if let Some(secs) = timeout {
                options = options.timeout_secs(secs);
            }
            for (name, value) in env {
                options = options.env(name, value);
            }
            options.cpus = cpus.or(options.cpus);
            options.memory_mb = memory.or(options.memory_mb);
            options.processes = processes.or(options.processes);
            options.read_rate = read_rate.or(options.read_rate);
            options.write_rate = write_rate.or(options.write_rate);

            let sandbox = config.into_sandbox()?;
            debug!("running {} in sandbox '{}'", script.display(), sandbox.name());
            let result = sandbox.run_code(&code, &options)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if !result.output.is_empty() {
                    print!("{}", result.output);
                }
                if !result.error.is_empty() {
                    eprint!("{}", result.error);
                }
            }
            Ok(())
        }
    }
}
