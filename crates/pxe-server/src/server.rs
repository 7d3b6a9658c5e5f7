//! Main PXE server implementation.
//!
//! Wires the configuration into a DHCPv6 server: server DUID, boot URL
//! source, address pool and reply builder.

use crate::config::{BootSource, ServerConfig};
use crate::dhcp::{Dhcpv6Handler, Dhcpv6Server};
use crate::error::PxeError;
use chrono::Utc;
use dhcp6::{
    ApiBootConfiguration, BootConfiguration, FileBootConfiguration, PacketBuilder,
    RandomAddressPool, StaticBootConfiguration, duid_llt,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// DHCPv6 boot server
#[derive(Debug)]
pub struct PxeServer {
    dhcp: Dhcpv6Server,
    shutdown: watch::Sender<bool>,
}

impl PxeServer {
    /// Creates a server from `config` and binds its socket.
    pub async fn new(config: &ServerConfig) -> Result<Self, PxeError> {
        let handler = build_handler(config).await?;
        let dhcp =
            Dhcpv6Server::bind(config.listen_addr, config.interface_index, handler).await?;
        Ok(Self::with_dhcp(dhcp))
    }

    /// Wraps an already bound DHCPv6 server
    pub fn with_dhcp(dhcp: Dhcpv6Server) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { dhcp, shutdown }
    }

    /// Underlying DHCPv6 server
    pub fn dhcp(&self) -> &Dhcpv6Server {
        &self.dhcp
    }

    /// Serves requests until [`PxeServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), PxeError> {
        info!("Starting DHCPv6 boot server");
        self.dhcp.run(self.shutdown.subscribe()).await
    }

    /// Stops the receive loop; replies already in flight still complete.
    pub fn shutdown(&self) {
        info!("Shutting down DHCPv6 boot server");
        self.shutdown.send_replace(true);
    }
}

/// Build the datagram handler described by `config`
pub async fn build_handler(config: &ServerConfig) -> Result<Dhcpv6Handler, PxeError> {
    let builder = PacketBuilder::new(config.preferred_lifetime, config.valid_lifetime)?;
    let server_duid = duid_llt(&config.server_mac, Utc::now());

    let boot_config: Arc<dyn BootConfiguration> = match &config.boot {
        BootSource::Api { url, timeout } => {
            info!(url = %url, timeout_secs = timeout.as_secs(), "Boot URLs from boot API");
            Arc::new(ApiBootConfiguration::new(
                url,
                *timeout,
                config.preference,
                config.dns_servers.clone(),
            )?)
        }
        BootSource::File { path } => {
            info!(path = %path.display(), "Boot URLs from boot table");
            Arc::new(
                FileBootConfiguration::load(path, config.preference, config.dns_servers.clone())
                    .await?,
            )
        }
        BootSource::Static {
            http_boot_url,
            ipxe_boot_url,
        } => {
            info!(http_boot_url = %http_boot_url, ipxe_boot_url = %ipxe_boot_url, "Static boot URLs");
            Arc::new(StaticBootConfiguration::new(
                http_boot_url.as_str(),
                ipxe_boot_url.as_str(),
                config.preference,
                config.dns_servers.clone(),
            ))
        }
    };

    let addresses = RandomAddressPool::new(
        config.pool_start,
        config.pool_size,
        config.valid_lifetime,
    )?;
    info!(
        start = %config.pool_start,
        size = config.pool_size,
        preferred_lifetime = config.preferred_lifetime,
        valid_lifetime = config.valid_lifetime,
        "Address pool"
    );

    Ok(Dhcpv6Handler::new(
        builder,
        server_duid,
        boot_config,
        Arc::new(addresses),
    ))
}
