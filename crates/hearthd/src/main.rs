mod config;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hearth_ble::bluez::BluezBus;
use hearth_ble::{AdapterManager, AdapterSession, BleError, NullProbe};
use hearth_core::{
    Command, DeviceDescription, DeviceId, DevicePrefix, ModuleType, RefreshTime,
};
use hearth_link::{Connector, LinkError};

use crate::config::{Config, ConfigError};

/// How long each discovery round listens for advertisements.
const SCAN_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "hearthd", version, about = "hearth gateway daemon")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ble(#[from] BleError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        tracing::error!(error = %err, "daemon failed");
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let config = Config::load(args.config.as_deref())?;

    let bus = Arc::new(BluezBus::connect().await?);
    let manager = AdapterManager::new(bus, Arc::new(NullProbe), config.session_timing())?;

    let session = manager.lookup(&config.bluetooth.adapter).await?;
    session.up().await?;
    info!(adapter = %config.bluetooth.adapter, "adapter up, discovery running");

    let connector = Connector::new(config.link_config())?;
    connector.start();

    let announce_interval = Duration::from_secs(config.gateway.announce_interval);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = announce_loop(&session, &connector, announce_interval) => {}
    }

    connector.stop().await;
    manager.shutdown().await;
    Ok(())
}

/// Periodically scan and announce devices the server has not heard
/// about yet. Failed announcements are retried on a later round.
async fn announce_loop(
    session: &Arc<AdapterSession>,
    connector: &Connector,
    interval: Duration,
) {
    let mut announced: HashSet<_> = HashSet::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let found = match session.lescan(SCAN_WINDOW).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "discovery round failed");
                continue;
            }
        };

        for (mac, name) in found {
            if !announced.insert(mac) {
                continue;
            }

            let description = DeviceDescription {
                id: DeviceId::from_mac(DevicePrefix::Ble, mac),
                vendor: "unknown".into(),
                product_name: name,
                module_types: vec![ModuleType::Rssi],
                refresh: RefreshTime::None,
                mac: Some(mac),
            };

            match connector.execute(Command::NewDevice(description)).await {
                Ok(_) => info!(%mac, "announced new device"),
                Err(err) => {
                    warn!(%mac, error = %err, "announcement failed, will retry");
                    announced.remove(&mac);
                }
            }
        }
    }
}
