pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use threadline_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(
    name = "threadline",
    about = "Threadline operator CLI",
    long_about = "Inspect configuration, apply migrations, and replay scripted conversations through the routing engine.",
    after_help = "Examples:\n  threadline config\n  threadline migrate\n  threadline replay script.jsonl --session demo"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a threadline.toml configuration file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the effective configuration with source attribution as JSON")]
    Config,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Feed a JSONL script of user messages through a session, one action per line")]
    Replay {
        #[arg(help = "JSONL file; each line is {\"message\": \"...\"} or a bare JSON string")]
        script: PathBuf,
        #[arg(long, default_value = "replay", help = "Session id used for lines without one")]
        session: String,
        #[arg(long, help = "Load and save sessions through the configured database")]
        persist: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Config => commands::config::run(&options),
        Command::Migrate => commands::migrate::run(&options),
        Command::Replay { script, session, persist } => {
            commands::replay::run(&options, &script, &session, persist)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays machine-readable.
pub fn init_logging(config: &LoggingConfig) {
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}
