//! Binary entrypoint for the g38d CLI.
//!
//! Commands:
//! - `start` - run the game-flow daemon (recovers rooms, then accepts sessions)
//! - `status` - print per-room round state and process counters
//!
//! A missing config file is generated with defaults on first `start`, so a
//! fresh checkout comes up with one room and a development dealer token.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use g38d::config::Config;
use g38d::server::GameServer;

#[derive(Parser)]
#[command(name = "g38d")]
#[command(about = "Game-flow orchestrator daemon for the G38 bingo/lottery service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "g38d.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the game-flow daemon
    Start {
        /// Listen address override (e.g. 0.0.0.0:7138)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Show per-room state and counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(_) if matches!(cli.command, Commands::Start { .. }) => {
            let config = Config::create_default(&cli.config).await?;
            eprintln!("wrote default configuration to {}", cli.config);
            config
        }
        Err(e) => return Err(e),
    };
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Start { bind } => {
            info!("starting g38d v{}", env!("CARGO_PKG_VERSION"));
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let mut server = GameServer::new(config).await?;
            server.run().await?;
        }
        Commands::Status => {
            let server = GameServer::new(config).await?;
            server.show_status().await?;
        }
    }

    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level.
    let level = match verbosity {
        0 => config
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    if let Some(ref file) = config.logging.file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                writeln!(fmt, "{}", line)
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
