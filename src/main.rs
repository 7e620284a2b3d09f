#![forbid(unsafe_code)]

//! `framed-rpc`: run one JSON-RPC tool call against a stdio server.
//!
//! Spawns the configured server, sends `initialize` followed by a
//! `tools/call` carrying a script, prints every envelope the server answers
//! with, and exits non-zero unless the tool call was answered.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use framed_rpc::orchestrator::predicate::ResponseWithId;
use framed_rpc::sink::transcript::JsonlTranscript;
use framed_rpc::sink::{EventSink, NullSink};
use framed_rpc::{
    AppError, Envelope, ExitPolicy, Result, SessionConfig, SessionOrchestrator, SessionState,
};

/// Protocol revision announced in `initialize`.
const PROTOCOL_VERSION: &str = "2024-10-30";

const INITIALIZE_ID: i64 = 1;
const TOOL_CALL_ID: i64 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ExitPolicyArg {
    Tolerate,
    FailOnError,
}

impl From<ExitPolicyArg> for ExitPolicy {
    fn from(arg: ExitPolicyArg) -> Self {
        match arg {
            ExitPolicyArg::Tolerate => Self::Tolerate,
            ExitPolicyArg::FailOnError => Self::FailOnError,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "framed-rpc", about = "Run one JSON-RPC tool call over child stdio", version, long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["config", "server_path"])))]
#[command(group(ArgGroup::new("source").required(true).args(["script", "script_file"])))]
struct Cli {
    /// Path to the TOML session configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server executable, used when no config file is given.
    #[arg(long)]
    server_path: Option<PathBuf>,

    /// Argument passed to the server; repeat for several.
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Working directory for the server.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Session timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Tool invoked through `tools/call`.
    #[arg(long, default_value = "app.finder")]
    tool: String,

    /// Script passed as the tool's `script` argument.
    #[arg(long)]
    script: Option<String>,

    /// File whose contents are passed as the tool's `script` argument.
    #[arg(long)]
    script_file: Option<PathBuf>,

    /// Append session events to this JSONL file.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// How an early server exit is classified.
    #[arg(long, value_enum)]
    exit_policy: Option<ExitPolicyArg>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match (&args.config, &args.server_path) {
        (Some(path), _) => SessionConfig::load_from_path(path)?,
        (None, Some(server)) => SessionConfig::for_server(server)?,
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --server-path is required".into(),
            ))
        }
    };
    apply_overrides(&mut config, &args)?;
    info!(server = %config.server.path.display(), "configuration loaded");

    let script = match (&args.script, &args.script_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|err| {
            AppError::Io(format!("cannot read script {}: {err}", path.display()))
        })?,
        (None, None) => {
            return Err(AppError::Config(
                "either --script or --script-file is required".into(),
            ))
        }
    };

    // ── Build the session ───────────────────────────────
    let requests = tool_call_requests(&args.tool, &script);
    let orchestrator = SessionOrchestrator::new(config.spawn_spec(), config.session_options());
    let mut sink: Box<dyn EventSink> = match config.transcript() {
        Some(path) => Box::new(JsonlTranscript::open(path)?),
        None => Box::new(NullSink),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling session");
            ctrl_c.cancel();
        }
    });

    // ── Run ─────────────────────────────────────────────
    let result = orchestrator
        .run(
            &requests,
            &ResponseWithId(TOOL_CALL_ID),
            sink.as_mut(),
            &cancel,
        )
        .await?;

    for envelope in &result.responses {
        let pretty = serde_json::to_string_pretty(envelope)
            .map_err(|err| AppError::Io(format!("failed to render response: {err}")))?;
        println!("{pretty}");
    }

    if result.state == SessionState::Completed {
        Ok(())
    } else {
        Err(AppError::Session(format!(
            "tool call not answered: {} ({} responses received)",
            result.reason,
            result.responses.len()
        )))
    }
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut SessionConfig, args: &Cli) -> Result<()> {
    if !args.server_args.is_empty() {
        config.server.args.clone_from(&args.server_args);
    }
    if let Some(dir) = &args.working_dir {
        config.server.working_dir = Some(dir.clone());
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.session.timeout_ms = timeout_ms;
    }
    if let Some(policy) = args.exit_policy {
        config.session.exit_policy = policy.into();
    }
    if let Some(path) = &args.transcript {
        config.session.transcript = Some(path.clone());
    }
    config.validate()
}

/// `initialize` followed by a `tools/call` running `script` through `tool`.
fn tool_call_requests(tool: &str, script: &str) -> Vec<Envelope> {
    vec![
        Envelope::request(
            INITIALIZE_ID,
            "initialize",
            json!({
                "client": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "protocol_version": PROTOCOL_VERSION,
            }),
        ),
        Envelope::request(
            TOOL_CALL_ID,
            "tools/call",
            json!({
                "name": tool,
                "arguments": { "script": script },
            }),
        ),
    ]
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
