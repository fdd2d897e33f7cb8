//! # Prithvi Runner
//!
//! Offline playback runner for the locator engine.
//!
//! ## Commands
//! - `playback` - replay a JSONL pick stream through the engine; published
//!   origins are written to stdout as JSONL
//! - `check-config` - load and echo the effective configuration

pub mod feed;

use std::cell::RefCell;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use prithvi_engine::Locator;
use prithvi_models::{LocatorConfig, Origin, Pick, Station};

use crate::feed::JsonlReader;

#[derive(Parser, Debug)]
#[command(name = "prithvi")]
#[command(about = "Prithvi - seismic event nucleation, association and refinement")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSONL pick stream through the engine
    Playback {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Station inventory, one JSON station per line
        #[arg(long)]
        stations: String,

        /// Pick stream, one JSON pick per line, in feed order
        #[arg(long)]
        picks: String,

        /// Optional nucleation grid file (lat lon dep radius per line)
        #[arg(long)]
        grid: Option<String>,
    },

    /// Load the configuration and echo the effective values
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: String,
    },
}

/// Initialize stdout logging; `RUST_LOG` overrides the default level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Main entry point for the runner.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Playback {
            config,
            stations,
            picks,
            grid,
        } => run_playback(config.as_deref(), &stations, &picks, grid.as_deref()),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn run_playback(
    config_path: Option<&str>,
    stations_path: &str,
    picks_path: &str,
    grid_path: Option<&str>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => LocatorConfig::load(path)?,
        None => LocatorConfig::default(),
    };
    // The logical clock must follow the pick stream, not the wall clock.
    config.playback = true;

    let mut engine = Locator::with_defaults(config)?;
    if let Some(grid) = grid_path {
        let cells = engine.set_grid_file(grid)?;
        info!("loaded {cells} nucleation grid cells from {grid}");
    }

    let mut station_count = 0usize;
    for station in JsonlReader::<Station>::open(stations_path)? {
        if engine.set_station(station?) {
            station_count += 1;
        }
    }
    info!("registered {station_count} stations from {stations_path}");

    let published = Rc::new(RefCell::new(0usize));
    let counter = published.clone();
    engine.set_report_sink(Box::new(move |origin: &Origin| {
        *counter.borrow_mut() += 1;
        match serde_json::to_string(origin) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!("failed to serialize origin {}: {err}", origin.id),
        }
    }));

    let mut fed = 0usize;
    for pick in JsonlReader::<Pick>::open(picks_path)? {
        engine.feed_pick(pick?);
        fed += 1;
    }

    engine.shutdown();
    info!(
        "playback finished: {fed} picks fed, {} origin updates published",
        published.borrow()
    );
    Ok(())
}

fn run_check_config(config_path: &str) -> anyhow::Result<()> {
    let config = LocatorConfig::load(config_path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
