//! DHCPv6 server transport.
//!
//! Receives client datagrams on UDP port 547 and answers each one from its
//! own tokio task: decode, acceptance checks, reply construction, encode,
//! send back to the source address. A failure in one task never stops the
//! receive loop.

use crate::error::PxeError;
use dhcp6::{AddressPool, BootConfiguration, Packet, PacketBuilder, Response};
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// UDP port DHCPv6 servers listen on
pub const DHCPV6_SERVER_PORT: u16 = 547;

/// All_DHCP_Relay_Agents_and_Servers
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

const MAX_DATAGRAM_LEN: usize = 65_535;

/// Turns one inbound datagram into an optional reply datagram
pub struct Dhcpv6Handler {
    builder: PacketBuilder,
    server_duid: Vec<u8>,
    boot_config: Arc<dyn BootConfiguration>,
    addresses: Arc<dyn AddressPool>,
}

impl fmt::Debug for Dhcpv6Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dhcpv6Handler")
            .field("builder", &self.builder)
            .field("server_duid", &self.server_duid)
            .finish_non_exhaustive()
    }
}

impl Dhcpv6Handler {
    /// Handler answering as `server_duid` from the given collaborators
    pub fn new(
        builder: PacketBuilder,
        server_duid: Vec<u8>,
        boot_config: Arc<dyn BootConfiguration>,
        addresses: Arc<dyn AddressPool>,
    ) -> Self {
        Self {
            builder,
            server_duid,
            boot_config,
            addresses,
        }
    }

    /// DUID this server identifies itself with
    pub fn server_duid(&self) -> &[u8] {
        &self.server_duid
    }

    /// Answer `datagram`, or return `None` when nothing must be sent back
    pub async fn handle_datagram(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        let request = match Packet::unmarshal(datagram) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, len = datagram.len(), "Dropping undecodable datagram");
                return None;
            }
        };

        if let Err(e) = request.should_discard(&self.server_duid) {
            debug!(error = %e, "Discarding packet");
            return None;
        }

        let response = self
            .builder
            .build_response(
                &request,
                &self.server_duid,
                self.boot_config.as_ref(),
                self.addresses.as_ref(),
            )
            .await;

        match response {
            Ok(Response::Ignored) => None,
            Ok(Response::Reply(reply)) => {
                debug!(msg_type = ?reply.msg_type, "Sending reply");
                Some(reply.marshal())
            }
            Ok(Response::Degraded { reply, error }) => {
                warn!(msg_type = ?reply.msg_type, error = %error, "Sending reply without all requested addresses");
                Some(reply.marshal())
            }
            Err(e) => {
                warn!(msg_type = ?request.msg_type, error = %e, "Not replying");
                None
            }
        }
    }
}

/// DHCPv6 server bound to a UDP socket
#[derive(Debug)]
pub struct Dhcpv6Server {
    socket: Arc<UdpSocket>,
    handler: Arc<Dhcpv6Handler>,
}

impl Dhcpv6Server {
    /// Bind `[listen_addr]:547` and join the DHCPv6 server multicast group
    /// on `interface_index`
    pub async fn bind(
        listen_addr: Ipv6Addr,
        interface_index: u32,
        handler: Dhcpv6Handler,
    ) -> Result<Self, PxeError> {
        let socket =
            UdpSocket::bind(SocketAddrV6::new(listen_addr, DHCPV6_SERVER_PORT, 0, 0)).await?;
        socket.join_multicast_v6(&ALL_DHCP_RELAY_AGENTS_AND_SERVERS, interface_index)?;
        info!(
            addr = %socket.local_addr()?,
            interface_index,
            group = %ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            "DHCPv6 server listening"
        );
        Ok(Self::from_socket(socket, handler))
    }

    /// Serve on an already bound socket
    pub fn from_socket(socket: UdpSocket, handler: Dhcpv6Handler) -> Self {
        Self {
            socket: Arc::new(socket),
            handler: Arc::new(handler),
        }
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, PxeError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and answer datagrams until `shutdown` turns true or its
    /// sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PxeError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("DHCPv6 server stopping");
                        return Ok(());
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.spawn_reply(buf[..len].to_vec(), peer),
                        Err(e) => error!(error = %e, "Receiving datagram failed"),
                    }
                }
            }
        }
    }

    fn spawn_reply(&self, datagram: Vec<u8>, peer: SocketAddr) {
        let socket = Arc::clone(&self.socket);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let Some(reply) = handler.handle_datagram(&datagram).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, peer).await {
                warn!(peer = %peer, error = %e, "Sending reply failed");
            }
        });
    }
}
