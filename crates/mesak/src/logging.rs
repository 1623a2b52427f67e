use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive that overrides `--log-level`.
pub const LOG_ENV: &str = "MESAK_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn build_filter(level: LogLevel, env: Option<String>) -> EnvFilter {
    match env.filter(|directive| !directive.trim().is_empty()) {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("warning: ignoring invalid {LOG_ENV} ({err})");
            EnvFilter::new(level.as_directive())
        }),
        None => EnvFilter::new(level.as_directive()),
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let filter = build_filter(level, std::env::var(LOG_ENV).ok());
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
