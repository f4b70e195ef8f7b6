use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tunnelctl_core::config::Backend;
use tunnelctl_core::logging::{LogFile, LogFormat, LogOptions, init_logging};
use tunnelctl_core::{
    Config, DownOutcome, ErrorCode, ExecutionContext, IsolateManager, ReservedFlags,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "CONFIG is a configuration file, an interface name looked up in the search path,\na data:text/plain;base64 URI, or configuration text starting with '['.\n\nExamples:\n  tunnelctl up /etc/wireguard/wg0.conf\n  tunnelctl down wg0\n  tunnelctl --output json up office\n  tunnelctl strip wg0 | wg setconf wg0 /dev/stdin\n  tunnelctl save wg0")]
struct Args {
    /// Log level (defaults to the settings file)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Emit JSON logs
    #[arg(long, env = "TUNNELCTL_JSON_LOGS")]
    json_logs: bool,

    /// Also write logs to daily files in DIR
    #[arg(long, value_name = "DIR", env = "TUNNELCTL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Output format for command results (table|json)
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Platform backend, overriding the settings file
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Do not run PreUp/PostUp/PreDown/PostDown hooks
    #[arg(long)]
    no_hooks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Kernel,
    Memory,
}

impl From<BackendArg> for Backend {
    fn from(backend: BackendArg) -> Self {
        match backend {
            BackendArg::Kernel => Backend::Kernel,
            BackendArg::Memory => Backend::Memory,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring a tunnel up
    Up {
        /// Configuration reference
        config: String,
    },
    /// Take a tunnel down
    Down {
        /// Configuration reference
        config: String,
    },
    /// Print the configuration reduced to what `wg setconf` accepts
    Strip {
        /// Configuration reference
        config: String,
    },
    /// Write the running state of a tunnel back to its configuration file
    Save {
        /// Configuration reference
        config: String,
    },
}

/// Result of one command, as printed.
#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Report {
    Up {
        handle: u64,
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Down {
        status: &'static str,
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Strip {
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<String>,
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Save {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Report {
    fn code(&self) -> i32 {
        match self {
            Report::Up { code, .. }
            | Report::Down { code, .. }
            | Report::Strip { code, .. }
            | Report::Save { code, .. } => *code,
        }
    }

    fn error(&self) -> Option<&str> {
        match self {
            Report::Up { error, .. }
            | Report::Down { error, .. }
            | Report::Strip { error, .. }
            | Report::Save { error, .. } => error.as_deref(),
        }
    }

    fn render(&self, fmt: OutputFormat) -> Result<String> {
        if fmt == OutputFormat::Json {
            return serde_json::to_string_pretty(self).context("failed to encode result");
        }
        let text = match self {
            Report::Up { handle, code, .. } => {
                if *handle == 0 {
                    format!("Handle: {handle}\nCode: {code}")
                } else {
                    format!("Handle: {handle}")
                }
            }
            Report::Down { status, code, .. } => {
                if *code == 0 {
                    format!("Down: {status}")
                } else {
                    format!("Code: {code}")
                }
            }
            Report::Strip { config, code, .. } => match config {
                Some(config) => config.trim_end().to_string(),
                None => format!("Code: {code}"),
            },
            Report::Save { path, code, .. } => match path {
                Some(path) => format!("Saved: {}", path.display()),
                None => format!("Code: {code}"),
            },
        };
        Ok(text)
    }
}

/// Run one command against an acquired context.
fn execute(ctx: &mut ExecutionContext, command: &Command) -> Report {
    match command {
        Command::Up { config } => match ctx.up(config, ReservedFlags::NONE) {
            Ok(handle) => Report::Up {
                handle: handle.get(),
                code: ErrorCode::Ok.as_i32(),
                error: None,
            },
            Err(e) => Report::Up {
                handle: 0,
                code: ctx.last_error_code().as_i32(),
                error: Some(e.to_string()),
            },
        },
        Command::Down { config } => match ctx.down(config, ReservedFlags::NONE) {
            Ok(outcome) => Report::Down {
                status: match outcome {
                    DownOutcome::Stopped => "stopped",
                    DownOutcome::AlreadyDown => "already_down",
                },
                code: ErrorCode::Ok.as_i32(),
                error: None,
            },
            Err(e) => Report::Down {
                status: "failed",
                code: ctx.last_error_code().as_i32(),
                error: Some(e.to_string()),
            },
        },
        Command::Strip { config } => match ctx.strip(config) {
            Ok(text) => Report::Strip {
                config: Some(text),
                code: ErrorCode::Ok.as_i32(),
                error: None,
            },
            Err(e) => Report::Strip {
                config: None,
                code: e.code().as_i32(),
                error: Some(e.to_string()),
            },
        },
        Command::Save { config } => match ctx.save(config) {
            Ok(path) => Report::Save {
                path: Some(path),
                code: ErrorCode::Ok.as_i32(),
                error: None,
            },
            Err(e) => Report::Save {
                path: None,
                code: e.code().as_i32(),
                error: Some(e.to_string()),
            },
        },
    }
}

/// Settings file (or defaults) with command-line overrides applied.
fn load_settings(args: &Args) -> Result<Config> {
    let mut config = Config::load_or_default(args.settings.as_deref()).with_context(|| {
        match &args.settings {
            Some(path) => format!("failed to load settings from {}", path.display()),
            None => "failed to load settings".to_string(),
        }
    })?;
    if let Some(backend) = args.backend {
        config.tunnel.backend = backend.into();
    }
    if args.no_hooks {
        config.tunnel.run_hooks = false;
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are not usage errors
            let failed = e.use_stderr();
            let _ = e.print();
            return if failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match load_settings(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let mut log_options = LogOptions::from_config(&config);
    if let Some(level) = args.log_level {
        log_options.level = level.into();
    }
    if args.json_logs {
        log_options.format = LogFormat::Json;
    }
    log_options.file = args.log_dir.clone().map(LogFile::in_dir);
    let _guard = init_logging(log_options);

    let manager = IsolateManager::from_config(&config);
    let mut ctx = match manager.create() {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "Failed to initialize isolate");
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    let report = execute(&mut ctx, &args.command);
    ctx.teardown();

    if let Some(message) = report.error() {
        eprintln!("Error: {message}");
    }
    match report.render(args.output) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(1);
        }
    }

    info!(code = report.code(), "tunnelctl command completed");
    ExitCode::SUCCESS
}
