//! Subscriber setup. Call [`init`] once at startup, before anything logs.
//!
//! `RUST_LOG` wins over `--log-level` when set.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::{Args, ValueEnum};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, env = "LOG_OUTPUT", value_enum, default_value_t = LogOutput::File)]
    pub log_output: LogOutput,

    /// Log file, used with `--log-output file`
    #[arg(long, env = "LOG_FILE", default_value = "garden-station.log")]
    pub log_file: PathBuf,
}

fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("bad log level '{level}'")),
    }
}

fn writer(args: &LogArgs) -> Result<BoxMakeWriter> {
    Ok(match args.log_output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&args.log_file)
                .with_context(|| format!("failed to open log file {}", args.log_file.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    })
}

pub fn init(args: &LogArgs) -> Result<()> {
    let env_filter = filter(&args.log_level)?;
    let writer = writer(args)?;
    // ANSI colour only makes sense on a terminal.
    let ansi = args.log_output != LogOutput::File;

    let result = match args.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    result.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
