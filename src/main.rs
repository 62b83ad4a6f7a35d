//! Binary entrypoint for the missionkeeper CLI.
//!
//! Commands:
//! - `start` - run the mission engine against a JSON-lines host bridge on stdin/stdout
//! - `init` - create a starter `config.toml` and a sample mission catalog
//! - `check` - validate the configuration and mission catalog
//! - `status --player <id>` - print the stored missions of one player
//! - `purge` - delete every expired mission from the database
//!
//! See the library crate docs for module-level details: `missionkeeper::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use missionkeeper::config::Config;
use missionkeeper::host::stdio::{write_outputs, StdioHost};
use missionkeeper::host::Host;
use missionkeeper::missions::reset::sweep_expired;
use missionkeeper::missions::{
    start_engine, EngineConfig, EventRouter, MissionCatalog, MissionService, MissionStorage, ServiceSettings,
    SledMissionStore,
};

const SAMPLE_CATALOG: &str = include_str!("../data/missions.json");

#[derive(Parser)]
#[command(name = "missionkeeper")]
#[command(about = "Per-player mission engine for game servers")]
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
    /// Run the mission engine, reading host messages from stdin
    Start,
    /// Write a default configuration and a sample mission catalog
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration and mission catalog
    Check,
    /// Show the stored missions of a player
    Status {
        /// 64-bit platform id of the player
        #[arg(short, long)]
        player: u64,
    },
    /// Remove expired missions from the database
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init { .. } => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            run_engine(config).await?;
        }
        Commands::Init { force } => {
            info!("Initializing new missionkeeper configuration");
            let cfg = Config::default();
            if force || !std::path::Path::new(&cli.config).exists() {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            } else {
                warn!("{} already exists; use --force to overwrite", cli.config);
            }
            let catalog_path = std::path::Path::new(&cfg.missions.catalog_path);
            if force || !catalog_path.exists() {
                tokio::fs::write(catalog_path, SAMPLE_CATALOG).await?;
                info!("Sample mission catalog written to {}", catalog_path.display());
            } else {
                warn!("{} already exists; use --force to overwrite", catalog_path.display());
            }
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
        }
        Commands::Check => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let warnings = config.validate();
            for warning in &warnings {
                warn!("{}", warning);
            }
            let catalog = MissionCatalog::load_from_file(&config.missions.catalog_path)?;
            let router = EventRouter::from_catalog(&catalog);
            println!("Configuration: {}", cli.config);
            println!("Reset mode: {}", config.missions.reset_mode);
            println!(
                "Quotas: {} normal / {} VIP, minimum {} players",
                config.missions.amount_normal, config.missions.amount_vip, config.missions.minimum_players
            );
            println!("Missions in catalog: {}", catalog.len());
            for (event, targets) in router.registered_events() {
                println!("  {} -> {}", event, targets.join(", "));
            }
            if !router.unknown_events().is_empty() {
                println!("Unsupported events: {}", router.unknown_events().join(", "));
            }
            println!("Warnings: {}", warnings.len());
        }
        Commands::Status { player } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let store = SledMissionStore::open(config.storage.missions_db_path())?;
            let records = store.list_by_player(player)?;
            if records.is_empty() {
                println!("No stored missions for {}", player);
            }
            let now = Utc::now();
            for record in records {
                let state = if record.completed {
                    "done".to_string()
                } else {
                    format!("{}/{}", record.progress.min(record.amount), record.amount)
                };
                let expiry = match record.expires_at {
                    Some(at) if at < now => "expired".to_string(),
                    Some(at) => format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => "no expiry".to_string(),
                };
                println!("#{:<6} {:<10} {:<40} {}", record.id, state, record.phrase, expiry);
            }
        }
        Commands::Purge => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let store = SledMissionStore::open(config.storage.missions_db_path())?;
            store.initialize()?;
            let stats = sweep_expired(&store, Utc::now())?;
            println!("Removed {} expired missions", stats.removed);
        }
    }

    Ok(())
}

async fn run_engine(config: Config) -> Result<()> {
    info!("Starting missionkeeper v{}", env!("CARGO_PKG_VERSION"));
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let catalog = MissionCatalog::load_from_file(&config.missions.catalog_path)
        .map_err(|e| anyhow!("Failed to load mission catalog: {}", e))?;
    let store = SledMissionStore::open(config.storage.missions_db_path())?;
    store.initialize()?;

    let (stdio, outputs) = StdioHost::new();
    #[allow(unused_mut)]
    let mut host = Host::from_shared(Arc::clone(&stdio));
    #[cfg(feature = "webhook")]
    if let Some(hook) = missionkeeper::host::webhook::HttpWebhook::from_config(&config.webhook) {
        info!("Completion webhook enabled");
        host = host.with_webhook(Arc::new(hook));
    }

    let service = MissionService::new(
        ServiceSettings::from_config(&config),
        Arc::new(catalog),
        Arc::new(store),
        host,
    );
    let engine = start_engine(service, EngineConfig::from_schedule(&config.schedule));
    let writer = tokio::spawn(write_outputs(outputs, tokio::io::stdout()));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        res = stdio.run(stdin, &engine) => {
            if let Err(e) = res {
                error!("host input failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    engine.shutdown().await;
    drop(stdio);
    // remaining notices are flushed once the engine drops its host handle
    match tokio::time::timeout(Duration::from_secs(2), writer).await {
        Ok(Ok(Err(e))) => warn!("output writer failed: {}", e),
        Ok(Err(e)) => warn!("output writer task failed: {}", e),
        Err(_) => warn!("output writer did not finish in time"),
        Ok(Ok(Ok(()))) => {}
    }
    info!("missionkeeper stopped");
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // stdout carries the host protocol, so logs never go there
    builder.target(env_logger::Target::Stderr);
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled is chatty at debug
    builder.filter_module("sled", log::LevelFilter::Warn);

    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    let opened = log_file.and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = opened {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching stderr
        let is_tty = atty::is(atty::Stream::Stderr);
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
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
