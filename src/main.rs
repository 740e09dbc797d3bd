mod codec;
mod config;
mod error;
mod modem;
mod wormhole;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use modem::ModemFacade;
use wormhole::downlink_delayed::DownlinkDelayedWormhole;
use wormhole::rx2::Rx2Wormhole;

#[derive(Parser)]
#[command(name = "chirpotle-rs")]
#[command(about = "LoRaWAN wire-level security evaluation toolkit")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chirpotle.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring up a single modem connection for manual probing.
    Modem { name: String },
    /// Bring up a wormhole of the given strategy between configured nodes.
    Wormhole {
        name: String,
        #[arg(value_enum)]
        strategy: Strategy,
    },
}

#[derive(Clone, ValueEnum)]
enum Strategy {
    Rx2,
    DownlinkDelayed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("warning: failed to load config from {:?}: {e}", cli.config);
        eprintln!("continuing with an empty configuration");
        config::Config { modems: Default::default(), wormholes: Default::default(), logging: Default::default() }
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .init();

    info!("chirpotle-rs v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Modem { name } => run_modem(&config, &name).await?,
        Command::Wormhole { name, strategy } => run_wormhole(&config, &name, strategy).await?,
    }

    Ok(())
}

async fn run_modem(config: &config::Config, name: &str) -> anyhow::Result<()> {
    let modem_config = config
        .modems
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("no modem named {name:?} in config"))?
        .clone();
    let facade = modem::connect(modem_config);
    info!(modem = name, "connected, probing clock");
    let time = facade.get_time().await?;
    info!(modem = name, time_us = time, "modem reports time");
    Ok(())
}

async fn run_wormhole(config: &config::Config, name: &str, strategy: Strategy) -> anyhow::Result<()> {
    let wh_config = config
        .wormholes
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("no wormhole named {name:?} in config"))?;

    let entry_modems = resolve_modems(config, &wh_config.entry_nodes)?;
    let exit_modems = resolve_modems(config, &wh_config.exit_nodes)?;
    let rx1_delay = Duration::from_secs_f64(wh_config.rx1_delay);

    match strategy {
        Strategy::Rx2 => {
            let channel_rx2 = wh_config.channel_rx2.unwrap_or(wh_config.channel);
            let mut wormhole = Rx2Wormhole::new(
                entry_modems,
                exit_modems,
                wh_config.channel,
                channel_rx2,
                rx1_delay,
                wh_config.dev_addr,
            );
            wormhole.up().await;
            info!(wormhole = name, "rx2 wormhole is up, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            wormhole.down().await;
        }
        Strategy::DownlinkDelayed => {
            let dev_addr = wh_config
                .dev_addr
                .ok_or_else(|| anyhow::anyhow!("downlink-delayed wormhole requires a dev_addr"))?;
            let mut wormhole =
                DownlinkDelayedWormhole::new(entry_modems, exit_modems, wh_config.channel, rx1_delay, dev_addr);
            wormhole.up().await;
            info!(wormhole = name, "downlink-delayed wormhole is up, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            wormhole.down().await;
        }
    }
    Ok(())
}

fn resolve_modems(config: &config::Config, names: &[String]) -> anyhow::Result<Vec<Arc<ModemFacade>>> {
    names
        .iter()
        .map(|n| {
            let modem_config =
                config.modems.get(n).cloned().ok_or_else(|| anyhow::anyhow!("no modem named {n:?}"))?;
            Ok(Arc::new(modem::connect(modem_config)))
        })
        .collect()
}
