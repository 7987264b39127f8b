use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use intercom::config::{DeviceConfig, FileConfig};
use intercom::IntercomClient;

/// Print ring and motion notifications from an intercom device.
#[derive(Debug, Parser)]
#[command(name = "intercom-listen", version)]
struct Args {
    /// TOML file with a [device] table; flags below are ignored when set.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    https: bool,
    /// May be repeated. Defaults to 6524 and 35344.
    #[arg(long = "port")]
    ports: Vec<u16>,
    #[arg(long)]
    no_burst_suppression: bool,
}

fn load_config(args: Args) -> Result<FileConfig> {
    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        return FileConfig::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()));
    }
    let (Some(host), Some(username), Some(password)) = (args.host, args.username, args.password)
    else {
        bail!("either --config or --host, --username and --password are required");
    };
    let mut device = DeviceConfig::new(host, username, password);
    device.https = args.https;
    device.accept_invalid_certs = args.https;
    device.validate()?;
    Ok(FileConfig {
        device,
        ports: args.ports,
        burst_suppression: !args.no_burst_suppression,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(Args::parse())?;
    let client = IntercomClient::new(config.device.clone())?;

    let mut listeners = Vec::new();
    for port in config.listen_ports() {
        let listener = client.listen(port, config.burst_suppression).await?;
        listener.on_ring(|event| {
            info!(device = %event.device_id, event = %event.event, at = %event.timestamp, "ring");
        });
        listener.on_motion(|event| {
            info!(device = %event.device_id, at = %event.timestamp, "motion");
        });
        listener.on_error(|err| tracing::warn!(error = %err, "notification error"));
        listeners.push(listener);
    }

    tokio::signal::ctrl_c().await?;
    for listener in &listeners {
        listener.close();
    }
    Ok(())
}
