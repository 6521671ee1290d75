use clap::Parser;
use tracing::{error, info};

use stompgate_config::GatewayConfig;
use stompgate_observability::{init_tracing, serve_monitoring, BridgeState};
use stompgate_server::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "stompgate")]
#[command(about = "STOMP 1.2 to AMQP 0.9.1 gateway")]
#[command(version)]
struct Cli {
    /// Listener host (overrides STOMPGATE_BIND_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listener port (overrides STOMPGATE_BIND_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// AMQP broker URL (overrides STOMPGATE_BROKER_URL)
    #[arg(long)]
    broker_url: Option<String>,

    /// Log filter, e.g. `info` or `stompgate=debug` (overrides STOMPGATE_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(broker_url) = cli.broker_url {
        config.broker.url = broker_url;
    }
    if let Some(log_level) = cli.log_level {
        config.logging.level = log_level;
    }
    if cli.log_json {
        config.logging.json = true;
    }
    config.validate()?;

    init_tracing(&config.logging)?;
    info!(%config, "starting stompgate");

    let bridge = BridgeState::new();
    if config.monitoring.enabled {
        let bind = config.monitoring.bind.clone();
        let state = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_monitoring(&bind, state).await {
                error!(error = %e, "management endpoint failed");
            }
        });
    }

    let supervisor = Supervisor::start(config, bridge).await?;
    tokio::select! {
        result = supervisor.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
    Ok(())
}
