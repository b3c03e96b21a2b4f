use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use fanout_hub::{Hub, cli::Cli, server};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.tuning.to_config().context("invalid tuning")?;
    let hub = Hub::spawn(config)?;

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!("listening on {}", listener.local_addr()?);

    let app = server::router(hub, cli.index);
    if let Err(err) = server::serve_until_ctrl_c(listener, app).await {
        warn!("server exited with error: {err:?}");
        return Err(err.into());
    }

    Ok(())
}
