//! Binary entrypoint for the meshgate CLI.
//!
//! Commands:
//! - `start [--host <addr>] [--port <n>]` - run the gateway, optionally overriding the radio address
//! - `init` - create a starter `config.toml`
//! - `status` - print partition counts and a brief summary
//!
//! See the library crate docs for module-level details: `meshgate::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use meshgate::config::Config;
use meshgate::gateway::Gateway;
use meshgate::ingest::SourceLane;
use meshgate::store::PacketStore;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "A storage gateway for LoRa mesh radio networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Radio TCP host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Radio TCP port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Initialize a new gateway configuration
    Init,
    /// Show partition counts and migration state
    Status {
        /// Emit machine-readable JSON instead of the human summary
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            // CLI overrides config for the radio address
            if let Some(host) = host {
                config.connection.host = host;
            }
            if let Some(port) = port {
                config.connection.port = port;
            }
            info!("Starting meshgate v{}", env!("CARGO_PKG_VERSION"));
            info!(
                "Radio at {}:{}, data in {}",
                config.connection.host, config.connection.port, config.storage.data_dir
            );
            let mut gateway = Gateway::new(config)?;
            gateway.run().await?;
        }
        Commands::Init => {
            info!("Initializing new gateway configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Edit it to set the radio address, then run: meshgate start");
        }
        Commands::Status { json } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let store = PacketStore::open(&config.storage.data_dir)?;
            let radio = store.count(SourceLane::Radio);
            let companion = store.count(SourceLane::Companion);
            let migrated = store.migration_complete()?;
            if json {
                let payload = serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "gateway": config.gateway.name,
                    "radio_address": format!("{}:{}", config.connection.host, config.connection.port),
                    "data_dir": config.storage.data_dir,
                    "radio_records": radio,
                    "companion_records": companion,
                    "lane_migration_complete": migrated,
                });
                println!("{}", payload);
            } else {
                println!("meshgate v{}", env!("CARGO_PKG_VERSION"));
                println!("Gateway name:        {}", config.gateway.name);
                println!("Radio address:       {}:{}", config.connection.host, config.connection.port);
                println!("Data directory:      {}", config.storage.data_dir);
                println!("Radio partition:     {} record(s)", radio);
                println!("Companion partition: {} record(s)", companion);
                println!(
                    "Lane migration:      {}",
                    if migrated { "complete" } else { "pending" }
                );
            }
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(ref file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            let write_mutex = mutex.clone();

            // When stdout is a terminal, echo log lines there as well as the file.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
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
