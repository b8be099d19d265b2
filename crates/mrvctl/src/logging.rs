//! Logging setup for the converter. Events go to stderr, keeping stdout
//! free for the per-table protocol lines.

use std::fmt;

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Can be one of trace|debug|info|warn|error
    #[arg(
        long = "log.level",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Warn
    )]
    pub level: LogLevel,

    /// Write logs as jsonl instead of human-readable text.
    #[arg(long = "log.json")]
    pub json: bool,
}

#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// Initializes the global subscriber. Panics if called twice.
pub fn init_logging(args: &LogArgs) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.level.to_string())
        .with_target(false);

    if args.json {
        builder.json().flatten_event(true).init();
    } else {
        builder
            .compact()
            .with_ansi(atty::is(atty::Stream::Stderr))
            .init();
    }
}
