mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use mesak_driver::DriverConfig;

use crate::cmd::Command;
use crate::exit::{driver_error, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mesak", version, about = "MESA-K radar client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Driver configuration file (JSON).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). MESAK_LOG overrides it.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn load_config(path: Option<&PathBuf>) -> CliResult<DriverConfig> {
    match path {
        Some(path) => DriverConfig::from_json_file(path)
            .map_err(|err| driver_error(&format!("cannot load {}", path.display()), err)),
        None => Ok(DriverConfig::default()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result =
        load_config(cli.config.as_ref()).and_then(|config| cmd::run(cli.command, format, config));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesak_frame::Category;

    #[test]
    fn parses_command_subcommand() {
        let cli = Cli::try_parse_from(["mesak", "command", "10.0.0.5", "*IDN?", "SYS:STATE?"])
            .expect("command args should parse");
        let Command::Command(args) = cli.command else {
            panic!("expected command subcommand");
        };
        assert_eq!(args.commands, vec!["*IDN?", "SYS:STATE?"]);
    }

    #[test]
    fn command_requires_at_least_one_command() {
        let err = Cli::try_parse_from(["mesak", "command", "10.0.0.5"])
            .expect_err("missing commands should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn parses_capture_categories() {
        let cli = Cli::try_parse_from([
            "mesak",
            "capture",
            "10.0.0.5",
            "--categories",
            "track,meas",
            "--count",
            "10",
        ])
        .expect("capture args should parse");
        let Command::Capture(args) = cli.command else {
            panic!("expected capture subcommand");
        };
        assert_eq!(
            args.categories,
            Some(vec![Category::Track, Category::Measurement])
        );
        assert_eq!(args.count, Some(10));
    }

    #[test]
    fn no_collect_requires_save() {
        let err = Cli::try_parse_from(["mesak", "capture", "10.0.0.5", "--no-collect"])
            .expect_err("--no-collect without --save should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn missing_config_file_is_a_usage_error() {
        let path = PathBuf::from("/nonexistent/mesak-config.json");
        let err = load_config(Some(&path)).expect_err("missing config should fail");
        assert_eq!(err.code, exit::USAGE);
    }
}
