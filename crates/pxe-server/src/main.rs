//! PXE Boot Server binary
//!
//! Loads configuration from the environment and serves DHCPv6 until
//! interrupted.

use anyhow::Result;
use pxe_server::{PxeServer, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting PXE Boot Server");

    let config = ServerConfig::from_env()?;
    info!("Configuration:");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Interface index: {}", config.interface_index);
    info!("  Pool: {} addresses from {}", config.pool_size, config.pool_start);

    let server = Arc::new(PxeServer::new(&config).await?);
    let mut running = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start().await }
    });

    tokio::select! {
        result = &mut running => result??,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupt received");
            server.shutdown();
            running.await??;
        }
    }

    Ok(())
}
