use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use mesak_driver::DriverConfig;
use mesak_frame::Category;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod capture;
pub mod command;
pub mod replay;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send commands to the radar and print the responses.
    Command(CommandArgs),
    /// Stream telemetry packets from the radar.
    Capture(CaptureArgs),
    /// Print packets stored in a capture directory.
    Replay(ReplayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: DriverConfig) -> CliResult<i32> {
    match command {
        Command::Command(args) => command::run(args, format, config),
        Command::Capture(args) => capture::run(args, format, config),
        Command::Replay(args) => replay::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Radar host name or address.
    pub host: String,
    /// Commands to send, in order.
    #[arg(required = true)]
    pub commands: Vec<String>,
    /// Command port. Default: from configuration (23).
    #[arg(long)]
    pub port: Option<u16>,
    /// Response timeout per command (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
    /// Keep sending after a command is rejected.
    #[arg(long)]
    pub keep_going: bool,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Radar host name or address.
    pub host: String,
    /// Categories to capture (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',')]
    pub categories: Option<Vec<Category>>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit after this long (e.g. 30s).
    #[arg(long)]
    pub duration: Option<String>,
    /// Also write every received packet to this directory.
    #[arg(long, value_name = "DIR")]
    pub save: Option<PathBuf>,
    /// Do not buffer or print packets; only save them.
    #[arg(long, requires = "save")]
    pub no_collect: bool,
    /// Include decoded records in JSON output.
    #[arg(long)]
    pub records: bool,
    /// Print per-category counters on exit.
    #[arg(long)]
    pub stats: bool,
    /// Command port. Default: from configuration (23).
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture directory written by `capture --save`.
    pub dir: PathBuf,
    /// Categories to replay (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',')]
    pub categories: Option<Vec<Category>>,
    /// Skip the first N packets of each category.
    #[arg(long, default_value = "0")]
    pub skip: usize,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Include decoded records in JSON output.
    #[arg(long)]
    pub records: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Requested categories in index order, or all of them.
pub fn selected_categories(requested: Option<&[Category]>) -> Vec<Category> {
    match requested {
        Some(requested) => Category::ALL
            .into_iter()
            .filter(|category| requested.contains(category))
            .collect(),
        None => Category::ALL.to_vec(),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
