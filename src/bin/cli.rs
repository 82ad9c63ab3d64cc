//! bbsbot CLI
//!
//! Connects to Telnet BBSes, waits for prompts and classifies captured
//! screens offline.

use anyhow::Context;
use bbsbot_core::cli::{format_check, format_prompt, format_screen, unescape_keys};
use bbsbot_core::{
    config, send_input, transcript_filename, wait_for_prompt, AppConfig, CliResult, ConfigError,
    ExitCodes, InputKind, OutputFormat, PatternError, PatternSet, PromptDetector, Session,
    SessionError, SessionLogger, SessionManager, SessionRequest, Snapshot, WaitCallbacks,
};
use clap::{ArgAction, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant, TryFromFloatSecsError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// bbsbot CLI
#[derive(Parser, Debug)]
#[command(name = "bbsbot", version, about = "Telnet BBS automation", long_about = None)]
struct Cli {
    /// Config file (default: platform config directory)
    #[arg(short, long, global = true, env = "BBSBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Prompt pattern file (YAML or TOML)
    #[arg(short, long, global = true, env = "BBSBOT_PATTERNS")]
    patterns: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Host (default: connection.host from config)
    host: Option<String>,

    /// Port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Record a transcript to this file
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct WaitArgs {
    #[command(flatten)]
    target: Target,

    /// Only accept prompts whose id contains this
    #[arg(short, long)]
    expect: Option<String>,

    /// Deadline in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Reply once the prompt is accepted (supports \r \n \e \xNN)
    #[arg(long)]
    send: Option<String>,

    /// Input kind for the reply (default: the prompt's own)
    #[arg(long)]
    kind: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect, read for a while and print the screen
    Connect {
        #[command(flatten)]
        target: Target,

        /// Seconds to read before printing
        #[arg(short, long, default_value = "3")]
        seconds: f64,
    },

    /// Connect and wait for a prompt
    Wait(WaitArgs),

    /// Classify a captured screen offline
    Check {
        /// Text file (default: stdin)
        file: Option<PathBuf>,

        /// Treat the cursor as sitting below the text
        #[arg(long)]
        cursor_not_at_end: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

fn log_filter(cli: &Cli, config: &AppConfig) -> tracing_subscriber::EnvFilter {
    let level = if cli.quiet {
        "error".to_string()
    } else if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else {
        match cli.verbose {
            0 => config.logging.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

/// Stderr logging plus an optional daily file; the guard must outlive main
fn init_logging(
    cli: &Cli,
    config: &AppConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let (file_layer, guard) = match config.logging.directory().filter(|_| config.logging.file) {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, "bbsbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(log_filter(cli, config))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

fn load_patterns(cli: &Cli, config: &AppConfig) -> Result<PatternSet, PatternError> {
    match cli.patterns.as_ref().or(config.patterns.file.as_ref()) {
        Some(path) => PatternSet::load(path),
        None => {
            tracing::warn!("no pattern file given, prompts will not be detected");
            Ok(PatternSet::default())
        }
    }
}

fn emit(cli: &Cli, text: &str) {
    if !cli.quiet || matches!(cli.format, OutputFormat::Json) {
        println!("{text}");
    }
}

async fn open_session(
    manager: &SessionManager,
    config: &AppConfig,
    target: &Target,
) -> anyhow::Result<Result<Arc<Session>, CliResult>> {
    let Some(telnet) = config.telnet_config(target.host.as_deref(), target.port) else {
        return Ok(Err(CliResult::error(
            ExitCodes::INVALID_ARGS,
            "no host given and connection.host is not configured",
        )));
    };
    let request: SessionRequest = SessionRequest::new(telnet)
        .options(config.session_options())
        .reuse(config.session.reuse_connections);

    let session = match manager.create_session(request).await {
        Ok(session) => session,
        Err(e) => return Ok(Err(e.into())),
    };

    let transcript = match &target.transcript {
        Some(path) => Some(path.clone()),
        None if config.logging.transcript => config.logging.directory().map(|dir| {
            dir.join(transcript_filename("session", config.logging.transcript_format))
        }),
        None => None,
    };
    if let Some(path) = transcript {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let logger = SessionLogger::with_file(&path, config.logging.transcript_format)
            .with_context(|| format!("opening transcript {}", path.display()))?;
        session.set_transcript(logger).await;
    }

    Ok(Ok(session))
}

/// How long `connect` keeps reading; rejects negative, NaN and infinite values
fn read_window(seconds: f64) -> Result<Duration, TryFromFloatSecsError> {
    Duration::try_from_secs_f64(seconds)
}

async fn cmd_connect(
    cli: &Cli,
    config: &AppConfig,
    manager: &SessionManager,
    target: &Target,
    seconds: f64,
) -> anyhow::Result<CliResult> {
    let window = match read_window(seconds) {
        Ok(window) => window,
        Err(e) => {
            let msg = format!("--seconds {seconds}: {e}");
            return Ok(CliResult::error(ExitCodes::INVALID_ARGS, msg));
        }
    };
    let session = match open_session(manager, config, target).await? {
        Ok(session) => session,
        Err(result) => return Ok(result),
    };

    let Some(deadline) = Instant::now().checked_add(window) else {
        let msg = format!("--seconds {seconds} is too large");
        return Ok(CliResult::error(ExitCodes::INVALID_ARGS, msg));
    };
    let poll = Duration::from_millis(config.wait.poll_interval_ms);
    let last = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let read = match session.read(poll.min(remaining), config.session.read_max_bytes).await {
            Ok(read) => read,
            Err(e) => return Ok(e.into()),
        };
        if remaining.is_zero() {
            break read;
        }
    };

    emit(cli, &format_screen(&last, cli.format));
    Ok(CliResult::success())
}

async fn cmd_wait(
    cli: &Cli,
    config: &AppConfig,
    manager: &SessionManager,
    args: &WaitArgs,
) -> anyhow::Result<CliResult> {
    let session = match open_session(manager, config, &args.target).await? {
        Ok(session) => session,
        Err(result) => return Ok(result),
    };

    let mut options = config.wait_options();
    if let Some(ms) = args.timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }
    if let Some(expect) = args.expect.as_deref() {
        options = options.expect(expect);
    }

    let result = match wait_for_prompt(&session, &options, &WaitCallbacks::new()).await {
        Ok(result) => result,
        Err(e @ SessionError::Timeout { .. }) => {
            let screen = session.snapshot().await;
            tracing::debug!(last_line = screen.last_line(), "no prompt before deadline");
            return Ok(e.into());
        }
        Err(e) => return Ok(e.into()),
    };
    emit(cli, &format_prompt(&result, cli.format));

    if let Some(keys) = args.send.as_deref() {
        let kind = args.kind.as_deref().map_or(result.input_kind, InputKind::parse);
        let keys = unescape_keys(keys);
        if let Err(e) = send_input(&session, &keys, kind, options.poll_interval).await {
            return Ok(e.into());
        }
    }

    if result.verdict.is_valid() {
        Ok(CliResult::success())
    } else {
        Ok(CliResult::validation_failed(format!(
            "{} field error(s) on prompt '{}'",
            result.verdict.errors.len(),
            result.prompt_id
        )))
    }
}

fn cmd_check(
    cli: &Cli,
    detector: &PromptDetector,
    file: Option<&Path>,
    cursor_not_at_end: bool,
) -> anyhow::Result<CliResult> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };

    let snapshot = Snapshot::from_text(&text, !cursor_not_at_end);
    let found = detector.detect_prompt(&snapshot);
    let guessed = PromptDetector::auto_detect_input_type(&text);
    emit(cli, &format_check(found.as_ref(), guessed, cli.format));

    Ok(match found {
        None => CliResult::pattern_not_found("no pattern matched"),
        Some(p) if !p.verdict.is_valid() => {
            CliResult::validation_failed(format!("{} field error(s)", p.verdict.errors.len()))
        }
        Some(_) => CliResult::success(),
    })
}

fn cmd_config(cli: &Cli, config: &AppConfig, path: bool) -> anyhow::Result<CliResult> {
    if path {
        let path = cli.config.clone().or_else(config::config_path);
        match path {
            Some(path) => println!("{}", path.display()),
            None => return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, "no config directory")),
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(CliResult::success())
}

async fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    if let Commands::Config { path } = &cli.command {
        return cmd_config(cli, config, *path);
    }

    let patterns = match load_patterns(cli, config) {
        Ok(patterns) => patterns,
        Err(e) => return Ok(e.into()),
    };
    tracing::debug!(count = patterns.len(), "patterns loaded");
    let detector = Arc::new(PromptDetector::new(patterns));

    if let Commands::Check { file, cursor_not_at_end } = &cli.command {
        return cmd_check(cli, &detector, file.as_deref(), *cursor_not_at_end);
    }

    let manager = SessionManager::new(config.session.max_sessions, detector);
    let result = match &cli.command {
        Commands::Connect { target, seconds } => {
            cmd_connect(cli, config, &manager, target, *seconds).await
        }
        Commands::Wait(args) => cmd_wait(cli, config, &manager, args).await,
        Commands::Check { .. } | Commands::Config { .. } => Ok(CliResult::success()),
    };
    manager.close_all_sessions().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };
    let _guard = init_logging(&cli, &config);

    let result = run(&cli, &config).await.unwrap_or_else(|e| {
        let code = e
            .downcast_ref::<SessionError>()
            .map_or(ExitCodes::ERROR, ExitCodes::for_session_error);
        CliResult::error(code, format!("{e:#}"))
    });

    if let CliResult::Error(code, msg) = &result {
        tracing::debug!(code, meaning = ExitCodes::describe(*code), "exiting with error");
        eprintln!("Error: {msg}");
    }
    result.to_exit_code()
}
