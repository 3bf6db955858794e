//! # Codestage CLI Entry Point
//!
//! Main binary for Codestage. Starts a server, or runs one function of a
//! program file against a running server.
//!
//! ## Usage
//!
//! ```bash
//! # Start a server
//! codestage serve -b 0.0.0.0:4000
//!
//! # Start a server from a JSON config file, overriding the timeout
//! codestage serve --config codestage.json --max-execution-time-ms 2000
//!
//! # Stage program.js, commit it, call hello and print its output
//! codestage run 127.0.0.1:4000 program.js hello
//!
//! # Call with a JSON argument and a 64-byte capacity
//! codestage run 127.0.0.1:4000 program.js add -n 64 -a '{"a": 1, "b": 2}'
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use argh::FromArgs;
use codestage_client::CodestageClient;
use codestage_server::{OverflowPolicy, Server, ServerConfig};
use tokio::io::AsyncWriteExt;

/// Environment variable consulted for the bind address when `-b` is absent.
const BIND_ENV: &str = "CODESTAGE_BIND";

#[derive(FromArgs)]
/// Codestage - stage JavaScript programs on a server and call their functions
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Run(RunArgs),
}

/// Arguments for starting a Codestage server.
///
/// Settings are layered: built-in defaults, then the `--config` file, then
/// `CODESTAGE_BIND`, then flags.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start a Codestage server
struct ServeArgs {
    /// address to listen on (default: 127.0.0.1:4000)
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// path to a JSON config file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// maximum execution time of a single PARSE or CALL in milliseconds
    ///
    /// Must be between 1 and 3600000 (1 hour).
    #[argh(option, long = "max-execution-time-ms")]
    max_execution_time_ms: Option<u64>,

    /// largest accepted program, in bytes
    #[argh(option, long = "max-payload-bytes")]
    max_payload_bytes: Option<usize>,

    /// largest output capacity a CALL may request, in bytes
    #[argh(option, long = "max-capacity")]
    max_capacity: Option<usize>,

    /// number of connections served at the same time
    #[argh(option, long = "max-connections")]
    max_connections: Option<usize>,

    /// what to do with output beyond the capacity: truncate or reject
    #[argh(option, long = "overflow")]
    overflow: Option<OverflowPolicy>,
}

/// Arguments for running one function of a program file.
///
/// Opens a session, stages and commits the file, calls the function and
/// writes its raw output to stdout. Errors go to stderr with a non-zero
/// exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// stage a program file and call one of its functions
struct RunArgs {
    /// address of the server, e.g. 127.0.0.1:4000
    #[argh(positional)]
    server_address: String,

    /// path to the JavaScript program
    #[argh(positional)]
    file: PathBuf,

    /// name of the function to call
    #[argh(positional)]
    function: String,

    /// maximum number of output bytes to receive (default: 4096)
    #[argh(option, short = 'n', long = "capacity", default = "4096")]
    capacity: usize,

    /// JSON value passed to the function as its first argument
    #[argh(option, short = 'a', long = "args")]
    args: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        Commands::Serve(args) => {
            // Set default log level to INFO, but allow RUST_LOG env var to override
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
            tracing_subscriber::fmt().with_env_filter(env_filter).init();

            run_serve(args).await
        }
        // No tracing here: stdout carries the function's output.
        Commands::Run(args) => run_program(args).await,
    }
}

/// Merges defaults, config file, environment and flags into one config.
fn build_config(args: &ServeArgs, env_bind: Option<String>) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    if let Some(bind) = args.bind.clone().or(env_bind) {
        config.bind = bind;
    }
    if let Some(ms) = args.max_execution_time_ms {
        config.limits.execution_timeout = Duration::from_millis(ms);
    }
    if let Some(max) = args.max_payload_bytes {
        config.max_payload_bytes = max;
    }
    if let Some(max) = args.max_capacity {
        config.max_capacity = max;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if let Some(policy) = args.overflow {
        config.overflow_policy = policy;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args, std::env::var(BIND_ENV).ok())?;

    tracing::info!("Starting Codestage server");
    tracing::info!("Maximum execution time: {}ms", config.limits.execution_timeout_ms());

    let server = Server::bind(config).await?;
    tracing::info!("Listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Executes the `run` subcommand.
///
/// # Errors
///
/// Returns an error if:
/// - The args string is not valid JSON
/// - The program file cannot be read
/// - The connection to the server fails
/// - Any of PARSE, COMMIT or CALL is answered with an error
async fn run_program(args: RunArgs) -> Result<()> {
    let call_args: Option<serde_json::Value> = args
        .args
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;

    let source = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let mut client = CodestageClient::connect(&args.server_address).await?;
    client.parse(source).await.context("PARSE failed")?;
    client.commit().await.context("COMMIT failed")?;

    let output = match call_args {
        Some(value) => client.call_with_args(&args.function, args.capacity, value).await,
        None => client.call(&args.function, args.capacity).await,
    }
    .with_context(|| format!("CALL {} failed", args.function))?;

    client.quit().await?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;

    Ok(())
}

/// CLI argument parsing tests.
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::from_args(&["codestage"], args).unwrap()
    }

    fn serve_args(args: &[&str]) -> ServeArgs {
        let mut full = vec!["serve"];
        full.extend_from_slice(args);
        match parse(&full).command {
            Commands::Serve(args) => args,
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args = serve_args(&[]);
        assert!(args.bind.is_none());
        assert!(args.config.is_none());
        assert!(args.overflow.is_none());

        let config = build_config(&args, None).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_cli_parse_serve_with_flags() {
        let args = serve_args(&[
            "-b", "0.0.0.0:9001",
            "--max-execution-time-ms", "2500",
            "--max-payload-bytes", "1024",
            "--max-capacity", "512",
            "--max-connections", "8",
            "--overflow", "reject",
        ]);

        let config = build_config(&args, None).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9001");
        assert_eq!(config.limits.execution_timeout, Duration::from_millis(2500));
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(config.max_capacity, 512);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
    }

    #[test]
    fn test_cli_rejects_unknown_overflow_policy() {
        assert!(Cli::from_args(&["codestage"], &["serve", "--overflow", "drop"]).is_err());
    }

    #[test]
    fn test_bind_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bind": "127.0.0.1:7000"}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let from_file = build_config(&serve_args(&["-c", &path]), None).unwrap();
        assert_eq!(from_file.bind, "127.0.0.1:7000");

        let from_env =
            build_config(&serve_args(&["-c", &path]), Some("127.0.0.1:7001".into())).unwrap();
        assert_eq!(from_env.bind, "127.0.0.1:7001");

        let from_flag = build_config(
            &serve_args(&["-c", &path, "-b", "127.0.0.1:7002"]),
            Some("127.0.0.1:7001".into()),
        )
        .unwrap();
        assert_eq!(from_flag.bind, "127.0.0.1:7002");
    }

    #[test]
    fn test_invalid_timeout_is_rejected() {
        let args = serve_args(&["--max-execution-time-ms", "0"]);
        assert!(build_config(&args, None).is_err());
    }

    #[test]
    fn test_cli_parse_run() {
        match parse(&["run", "127.0.0.1:4000", "prog.js", "hello"]).command {
            Commands::Run(RunArgs { server_address, file, function, capacity, args }) => {
                assert_eq!(server_address, "127.0.0.1:4000");
                assert_eq!(file, PathBuf::from("prog.js"));
                assert_eq!(function, "hello");
                assert_eq!(capacity, 4096); // default
                assert!(args.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_options() {
        match parse(&["run", "127.0.0.1:4000", "prog.js", "add", "-n", "64", "-a", r#"{"a":1}"#]).command {
            Commands::Run(RunArgs { capacity, args, .. }) => {
                assert_eq!(capacity, 64);
                assert_eq!(args.as_deref(), Some(r#"{"a":1}"#));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_run_requires_function() {
        assert!(Cli::from_args(&["codestage"], &["run", "127.0.0.1:4000", "prog.js"]).is_err());
    }
}
