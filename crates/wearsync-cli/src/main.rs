//! wearsync CLI
//!
//! Thin wrapper around wearsync-core for running either end of the sync.
//!
//! ## Usage
//!
//! ```bash
//! # Phone: answer requests from a paired watch, print the pairing code
//! wearsync phone --forecast ./forecast.json
//!
//! # Watch: pair with a phone and print every display update
//! wearsync watch --pair wear-pair:...
//!
//! # Both ends in one process over the loopback fabric
//! wearsync demo --high 24 --low 14 --condition 800
//!
//! # Merge phone and watch JSONL logs
//! wearsync --log-dir ./logs logs --device watch
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use wearsync_core::logging::{read_all_entries, read_entries_for_date, LoggingBuilder};
use wearsync_core::{
    ChannelDisplay, DirectoryIconSource, DisplayedWeather, ForecastRow, GeneratedIconSource,
    IconKind, IconSource, IrohConfig, IrohTransport, JsonFileSnapshotStore, LoopbackFabric,
    MemorySnapshotStore, PairingCode, PhoneResponder, PublishVariant, SyncConfig, SyncEvent,
    TemperatureUnit, Transport, WatchRequester,
};

/// wearsync - weather snapshots from phone to watch
#[derive(Parser)]
#[command(name = "wearsync")]
#[command(version = "0.1.0")]
#[command(about = "wearsync - weather snapshots from phone to watch")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ~/.wearsync/config.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer weather requests from a paired watch
    Phone {
        /// JSON file holding the current forecast row, re-read on every request
        #[arg(long)]
        forecast: PathBuf,

        /// Directory of PNG icons named after each condition
        #[arg(long)]
        icons: Option<PathBuf>,

        /// Persist icon assets here instead of memory
        #[arg(long)]
        blob_dir: Option<PathBuf>,

        #[arg(long, value_enum)]
        variant: Option<Variant>,

        #[arg(long, value_enum)]
        unit: Option<Unit>,
    },

    /// Pair with a phone and print weather as it arrives
    Watch {
        /// Pairing code printed by `wearsync phone`
        #[arg(long)]
        pair: String,

        /// Seconds between requests while running
        #[arg(long)]
        period: Option<u64>,
    },

    /// Run phone and watch in one process and print the decoded update
    Demo {
        /// High temperature in Celsius
        #[arg(long, allow_hyphen_values = true)]
        high: f64,

        /// Low temperature in Celsius
        #[arg(long, allow_hyphen_values = true)]
        low: f64,

        /// Weather condition code (e.g. 800 for clear sky)
        #[arg(long, default_value_t = 800)]
        condition: i32,

        #[arg(long, value_enum)]
        variant: Option<Variant>,

        #[arg(long, value_enum)]
        unit: Option<Unit>,

        /// Write the received icon to this PNG file
        #[arg(long)]
        icon_out: Option<PathBuf>,
    },

    /// Print JSONL log entries from --log-dir, oldest first
    Logs {
        /// Only files for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// Only entries from this device
        #[arg(long)]
        device: Option<String>,

        /// Minimum level (trace, debug, info, warn, error)
        #[arg(long, default_value = "trace")]
        level: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    /// /image then /weather-update as data items
    DataItem,
    /// One /weather-update data item carrying the icon asset
    Inline,
    /// Direct message to every reachable node
    Message,
}

impl From<Variant> for PublishVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::DataItem => PublishVariant::DataItem,
            Variant::Inline => PublishVariant::DataItemInline,
            Variant::Message => PublishVariant::Message,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Unit {
    Metric,
    Imperial,
}

impl From<Unit> for TemperatureUnit {
    fn from(u: Unit) -> Self {
        match u {
            Unit::Metric => TemperatureUnit::Metric,
            Unit::Imperial => TemperatureUnit::Imperial,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let device = match &cli.command {
        Commands::Phone { .. } => "phone",
        Commands::Watch { .. } => "watch",
        Commands::Demo { .. } => "demo",
        Commands::Logs { .. } => "logs",
    };
    let log_dir = match &cli.command {
        // Reading logs must not append to them
        Commands::Logs { .. } => None,
        _ => cli.log_dir.clone(),
    };
    LoggingBuilder::new(device)
        .verbosity(cli.verbose)
        .logs_dir(log_dir)
        .init()
        .context("Failed to initialize logging")?;

    let config = SyncConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load config")?;

    match cli.command {
        Commands::Phone {
            forecast,
            icons,
            blob_dir,
            variant,
            unit,
        } => {
            let config = apply_overrides(config, variant, unit);
            run_phone(config, &forecast, icons, blob_dir).await
        }
        Commands::Watch { pair, period } => {
            let config = match period {
                Some(secs) => config.with_request_period(Duration::from_secs(secs.max(1))),
                None => config,
            };
            run_watch(config, &pair).await
        }
        Commands::Demo {
            high,
            low,
            condition,
            variant,
            unit,
            icon_out,
        } => {
            let config = apply_overrides(config, variant, unit);
            run_demo(config, ForecastRow::new(high, low, condition), icon_out).await
        }
        Commands::Logs {
            date,
            device,
            level,
        } => {
            let dir = cli
                .log_dir
                .context("--log-dir is required to read logs")?;
            print_logs(&dir, date.as_deref(), device.as_deref(), &level)
        }
    }
}

fn apply_overrides(config: SyncConfig, variant: Option<Variant>, unit: Option<Unit>) -> SyncConfig {
    let config = match variant {
        Some(v) => config.with_publish_variant(v.into()),
        None => config,
    };
    match unit {
        Some(u) => config.with_temperature_unit(u.into()),
        None => config,
    }
}

fn icon_source(dir: Option<PathBuf>) -> Arc<dyn IconSource> {
    match dir {
        Some(dir) => Arc::new(DirectoryIconSource::new(dir)),
        None => Arc::new(GeneratedIconSource::default()),
    }
}

fn print_update(update: &DisplayedWeather) {
    println!("High: {}", update.high.as_deref().unwrap_or("--"));
    println!("Low: {}", update.low.as_deref().unwrap_or("--"));
    match &update.icon {
        Some(icon) => println!("Icon: {}x{} PNG ({} bytes)", icon.width, icon.height, icon.png.len()),
        None => println!("Icon: none"),
    }
}

async fn run_phone(
    config: SyncConfig,
    forecast: &Path,
    icons: Option<PathBuf>,
    blob_dir: Option<PathBuf>,
) -> Result<()> {
    let mut iroh_config = IrohConfig::default().with_event_capacity(config.event_capacity);
    if let Some(dir) = blob_dir {
        iroh_config = iroh_config.with_blob_dir(dir);
    }
    let transport = Arc::new(
        IrohTransport::host(iroh_config)
            .await
            .context("Failed to start iroh transport")?,
    );
    let code = transport.pairing_code().encode()?;

    println!("Node: {}", transport.local_node());
    println!("Pairing code: {}", code);
    println!("Serving forecast from {}", forecast.display());

    let phone = PhoneResponder::new(
        transport.clone(),
        Arc::new(JsonFileSnapshotStore::new(forecast)),
        icon_source(icons),
        config,
    );
    let mut events = phone.subscribe();
    phone.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Published { path, request_id }) => {
                    println!("Published {} (request {})", path, request_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()));
                }
                Ok(SyncEvent::CycleSkipped { reason }) => println!("Skipped: {}", reason),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    phone.shutdown();
    transport.shutdown().await?;
    Ok(())
}

async fn run_watch(config: SyncConfig, pair: &str) -> Result<()> {
    let code = PairingCode::decode(pair).context("Invalid pairing code")?;
    let iroh_config = IrohConfig::default().with_event_capacity(config.event_capacity);
    let transport = Arc::new(
        IrohTransport::join(iroh_config, &code)
            .await
            .context("Failed to join pairing topic")?,
    );
    println!("Node: {}", transport.local_node());

    let display = ChannelDisplay::new(config.event_capacity);
    let mut shown = display.subscribe();
    let watch = WatchRequester::new(transport.clone(), Arc::new(display), config);
    watch.start();
    watch.on_visibility_changed(true);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = shown.recv() => match update {
                Ok(update) => print_update(&update),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    watch.shutdown();
    transport.shutdown().await?;
    Ok(())
}

async fn run_demo(config: SyncConfig, row: ForecastRow, icon_out: Option<PathBuf>) -> Result<()> {
    let fabric = LoopbackFabric::with_capacity(config.event_capacity);

    let phone = PhoneResponder::new(
        Arc::new(fabric.join("phone")),
        Arc::new(MemorySnapshotStore::with_forecast(row)),
        Arc::new(GeneratedIconSource::default()),
        config.clone(),
    );
    phone.start();

    let display = ChannelDisplay::new(config.event_capacity);
    let mut shown = display.subscribe();
    let watch = WatchRequester::new(Arc::new(fabric.join("watch")), Arc::new(display), config);
    watch.start();

    let request_id = watch
        .request_weather()
        .await
        .context("Request task failed")??
        .context("Phone not reachable")?;
    tracing::info!(%request_id, "Demo request sent");

    let expect_icon = IconKind::for_condition(row.condition_code).is_some();
    let update = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match shown.recv().await {
                Ok(update) if update.has_temperatures() && (update.icon.is_some() || !expect_icon) => {
                    return Some(update);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
    .context("No weather update reached the watch")?;

    print_update(&update);
    if let (Some(path), Some(icon)) = (icon_out, &update.icon) {
        std::fs::write(&path, &icon.png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Icon written to {}", path.display());
    }

    watch.shutdown();
    phone.shutdown();
    Ok(())
}

fn level_rank(level: &str) -> u8 {
    match level.to_ascii_lowercase().as_str() {
        "trace" => 0,
        "debug" => 1,
        "info" => 2,
        "warn" => 3,
        _ => 4,
    }
}

fn print_logs(dir: &Path, date: Option<&str>, device: Option<&str>, level: &str) -> Result<()> {
    let entries = match date {
        Some(date) => read_entries_for_date(dir, date),
        None => read_all_entries(dir),
    }
    .with_context(|| format!("Failed to read logs in {}", dir.display()))?;

    let min = level_rank(level);
    for entry in entries
        .iter()
        .filter(|e| device.map_or(true, |d| e.device == d))
        .filter(|e| level_rank(&e.level) >= min)
    {
        let fields = entry
            .fields
            .as_ref()
            .map(|f| format!(" {}", f))
            .unwrap_or_default();
        println!(
            "{} {:>5} [{}] {}{}",
            entry.ts, entry.level, entry.device, entry.msg, fields
        );
    }
    Ok(())
}
