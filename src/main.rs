use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use ict_engine::config::{EngineConfig, InstrumentConfig};
use ict_engine::feed::{collect_bars, CsvBarFeed};
use ict_engine::replay::{run_replay, ReplayReport};
use ict_engine::trading_core::session::SessionFilter;
use ict_engine::trading_core::smt::correlated_symbol;
use ict_engine::trading_core::strategy::IctStrategy;

#[derive(Parser, Debug)]
#[command(name = "ict-engine")]
#[command(about = "ICT market-structure signal engine: historical bar replay")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay CSV bar files (one instrument each) and print signals as JSON lines
    Replay {
        /// Bar files (.csv or zstd-compressed .zst)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Engine config (JSON). Missing keys use defaults.
        #[arg(short, long, env = "ICT_ENGINE_CONFIG")]
        config: Option<PathBuf>,

        /// Symbol for every file (default: file name prefix, e.g. ES_2025.csv -> ES)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Bars of the correlated instrument for SMT divergence
        #[arg(long)]
        correlated: Option<PathBuf>,

        /// Starting account balance in USD
        #[arg(long, default_value = "50000")]
        balance: f64,

        /// Write signals here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default engine config as JSON
    Config,

    /// Show the killzone schedule relative to now
    Sessions {
        /// Engine config (JSON)
        #[arg(short, long, env = "ICT_ENGINE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "ict_engine=debug" } else { "ict_engine=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Replay {
            files,
            config,
            symbol,
            correlated,
            balance,
            output,
        } => {
            let base = load_config(config.as_deref())?;
            run_replay_files(&files, &base, symbol.as_deref(), correlated.as_deref(), balance, output.as_deref())?;
        }
        Commands::Config => {
            println!("{}", EngineConfig::default().to_json_pretty()?);
        }
        Commands::Sessions { config } => {
            let config = load_config(config.as_deref())?;
            print_sessions(&config);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            info!("Loading config from {:?}", path);
            EngineConfig::load(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Symbol from the file name prefix: `ES_2025-01.csv` -> `ES`
fn symbol_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let root = name.split(['_', '-', '.']).next()?;
    if root.is_empty() {
        None
    } else {
        Some(root.to_ascii_uppercase())
    }
}

/// Engine config for one instrument, using the contract preset when the
/// symbol differs from the configured one
fn config_for_symbol(base: &EngineConfig, symbol: &str) -> EngineConfig {
    let mut config = base.clone();
    if config.instrument.symbol != symbol {
        let history_capacity = config.instrument.history_capacity;
        config.instrument = match InstrumentConfig::for_symbol(symbol) {
            Some(preset) => InstrumentConfig {
                history_capacity,
                ..preset
            },
            None => InstrumentConfig {
                symbol: symbol.to_string(),
                ..config.instrument
            },
        };
    }
    config
}

fn replay_file(
    path: &Path,
    base: &EngineConfig,
    symbol: Option<&str>,
    correlated: &[ict_engine::Bar],
    balance: f64,
) -> Result<ReplayReport> {
    let symbol = symbol
        .map(str::to_string)
        .or_else(|| symbol_from_path(path))
        .unwrap_or_else(|| base.instrument.symbol.clone());
    let config = config_for_symbol(base, &symbol);
    config.validate().with_context(|| format!("Invalid config for {}", symbol))?;

    let mut engine = IctStrategy::new(config);
    let mut feed = CsvBarFeed::open(path, &symbol)?;
    run_replay(&mut engine, &mut feed, correlated, balance).with_context(|| format!("Replay failed for {:?}", path))
}

fn run_replay_files(
    files: &[PathBuf],
    base: &EngineConfig,
    symbol: Option<&str>,
    correlated: Option<&Path>,
    balance: f64,
    output: Option<&Path>,
) -> Result<()> {
    let correlated_bars = match correlated {
        Some(path) => {
            let primary = symbol
                .map(str::to_string)
                .or_else(|| files.first().and_then(|f| symbol_from_path(f)))
                .unwrap_or_else(|| base.instrument.symbol.clone());
            let pair = symbol_from_path(path)
                .or_else(|| correlated_symbol(&primary).map(str::to_string))
                .unwrap_or_default();
            let mut feed = CsvBarFeed::open(path, &pair)?;
            let bars = collect_bars(&mut feed)?;
            info!("Loaded {} correlated {} bars from {:?}", bars.len(), pair, path);
            bars
        }
        None => Vec::new(),
    };

    info!("Replaying {} files", files.len());
    let start = std::time::Instant::now();

    // Instruments are independent: one engine per file, in parallel
    let results: Vec<Result<ReplayReport>> = files
        .par_iter()
        .map(|path| replay_file(path, base, symbol, &correlated_bars, balance))
        .collect();

    let mut signals = Vec::new();
    for result in results {
        let report = result?;
        info!("{} | {}", report.summary(), report.status);
        signals.extend(report.signals);
    }
    signals.sort_by_key(|s| s.created_at);

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };
    for signal in &signals {
        writeln!(writer, "{}", serde_json::to_string(signal)?)?;
    }
    writer.flush()?;

    info!(
        "Done: {} signals in {:.1}s",
        signals.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn print_sessions(config: &EngineConfig) {
    let filter = SessionFilter::new(&config.session);
    let now = Utc::now();

    println!("Killzones (America/New_York):");
    for window in &config.session.killzones {
        println!(
            "  {:<10} {:02}:{:02}-{:02}:{:02}{}",
            window.name,
            window.start_hour,
            window.start_minute,
            window.end_hour,
            window.end_minute,
            if window.enabled { "" } else { " (disabled)" }
        );
    }
    println!("Now: {}", filter.current_session_label(now));
    if let Some((next, minutes)) = filter.next_killzone(now) {
        println!("Next: {} in {}h {:02}m", next.name, minutes / 60, minutes % 60);
    }
}
