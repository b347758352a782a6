//! Meter acquisition service (`metersrv`)
//!
//! Command-line front end: port listing, link probe, acquisition run and
//! serial snapshot management.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use meter_modbus::{Parity, SerialConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use metersrv::{MeterConfig, MeterService, SnapshotStore};

/// Command-line arguments for metersrv
#[derive(Parser, Debug)]
#[command(
    name = "metersrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Single-meter Modbus RTU acquisition service",
    long_about = None
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, env = "METERSRV_LOG_LEVEL")]
    log_level: Option<String>,

    /// Service configuration file (yaml, toml or json)
    #[arg(short = 'c', long, global = true, env = "METERSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(flatten)]
    serial: SerialArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the serial section
#[derive(clap::Args, Debug)]
struct SerialArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(short = 'p', long, global = true)]
    port: Option<String>,

    /// Modbus slave address (1-247)
    #[arg(short = 's', long, global = true)]
    slave: Option<u8>,

    #[arg(short = 'b', long, global = true)]
    baud: Option<u32>,

    /// none, odd or even
    #[arg(long, global = true)]
    parity: Option<Parity>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports present on this machine
    Ports,
    /// Send one short read and report whether a Modbus RTU device answers
    Probe,
    /// Poll the meter until Ctrl+C or SIGTERM
    Run,
    /// Manage the saved serial settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Save the effective serial settings
    Save,
    /// Print the saved serial settings
    Show,
    /// Delete the saved serial settings
    Clear,
}

impl SerialArgs {
    fn apply(&self, serial: &mut SerialConfig) {
        if let Some(port) = &self.port {
            serial.port.clone_from(port);
        }
        if let Some(slave) = self.slave {
            serial.slave_id = slave;
        }
        if let Some(baud) = self.baud {
            serial.baud_rate = baud;
        }
        if let Some(parity) = self.parity {
            serial.parity = parity;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = MeterConfig::load(args.config.as_deref())
        .with_context(|| format!("loading configuration {:?}", args.config))?;
    if let Some(level) = &args.log_level {
        config.logging.level = Some(level.clone());
    }
    if args.no_color {
        config.logging.ansi = false;
    }
    common::logging::init_with_config(&config.logging)
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let store = SnapshotStore::new(&config.snapshot_path);

    // Saved snapshot fills in a missing port; command-line flags win
    if config.serial.port.is_empty() {
        if let Some(saved) = store.load().await? {
            info!("Using saved serial settings from {}", store.path().display());
            config.serial = saved;
        }
    }
    args.serial.apply(&mut config.serial);

    match args.command {
        Command::Ports => list_ports(),
        Command::Probe => probe(config).await,
        Command::Run => run(config).await,
        Command::Config { action } => manage_snapshot(&store, &config.serial, action).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = meter_modbus::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn probe(config: MeterConfig) -> Result<()> {
    let slave = config.serial.slave_id;
    let port = config.serial.port.clone();
    let service = MeterService::new(config.serial, config.poller);

    match service.probe().await {
        Ok(protocol) => {
            println!("{port}: slave {slave} answered ({protocol})");
            Ok(())
        },
        Err(e) => Err(anyhow!("{port}: slave {slave} did not answer: {e}")),
    }
}

async fn run(config: MeterConfig) -> Result<()> {
    let service = MeterService::new(config.serial, config.poller);
    let mut readings = service.subscribe("cli");
    let mut status = service.subscribe_status("cli");

    service.start().await?;

    let token = CancellationToken::new();
    let _watcher = common::shutdown::cancel_on_shutdown(token.clone());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            reading = readings.recv() => match reading {
                Some(reading) => println!("{}", serde_json::to_string(&reading)?),
                None => {
                    warn!("Reading subscription closed");
                    break;
                },
            },
            Some(update) = status.recv() => match update.error_message {
                Some(message) => error!("Device status: {}", message),
                None => info!("Device status: connected={}", update.connected),
            },
        }
    }

    service.shutdown().await?;
    Ok(())
}

async fn manage_snapshot(
    store: &SnapshotStore,
    serial: &SerialConfig,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Save => {
            serial.validate()?;
            store.save(serial).await?;
            println!("Saved to {}", store.path().display());
        },
        ConfigAction::Show => match store.load().await? {
            Some(saved) => println!("{}", serde_json::to_string_pretty(&saved)?),
            None => println!("No saved serial settings at {}", store.path().display()),
        },
        ConfigAction::Clear => {
            store.clear().await?;
            println!("Cleared {}", store.path().display());
        },
    }
    Ok(())
}
