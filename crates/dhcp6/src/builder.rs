//! DHCPv6 reply construction.
//!
//! [`PacketBuilder`] answers Solicit, Request, InformationRequest and
//! Release messages. It holds only the server-wide lease lifetimes, so one
//! instance can serve any number of concurrent requests; lease state lives
//! in the [`AddressPool`] and boot URLs come from the [`BootConfiguration`].
//!
//! Reply options are assembled in a fixed order: client id, IA-NAs,
//! server id, vendor class, boot file URL, preference, DNS servers.

use crate::address_pool::{AddressPool, IdentityAssociation, Reservation};
use crate::boot_config::BootConfiguration;
use crate::error::Dhcp6Error;
use crate::identity::link_layer_address_or_id;
use crate::options::{self, ARCH_HTTP_CLIENT, OPT_CLIENT_ID, OPT_SERVER_ID, StatusCode};
use crate::packet::{DhcpOption, MessageType, Options, Packet};
use std::collections::{HashMap, HashSet};
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

/// Status message of a release acknowledgement
pub const RELEASE_RECEIVED: &str = "Release received.";

/// Reason used when the pool neither granted nor explained an association
pub const NO_ADDRESS_REASON: &str = "No address available for this identity association";

/// Result of handling one inbound message
#[derive(Debug)]
pub enum Response {
    /// Message type this server does not answer
    Ignored,
    /// Reply to send back
    Reply(Packet),
    /// Reply to send back, built while address reservation reported a failure
    Degraded { reply: Packet, error: Dhcp6Error },
}

impl Response {
    /// Reply packet, if there is one to send
    pub fn reply(&self) -> Option<&Packet> {
        match self {
            Response::Ignored => None,
            Response::Reply(reply) | Response::Degraded { reply, .. } => Some(reply),
        }
    }

    /// Consume the response, keeping the reply packet
    pub fn into_reply(self) -> Option<Packet> {
        match self {
            Response::Ignored => None,
            Response::Reply(reply) | Response::Degraded { reply, .. } => Some(reply),
        }
    }

    /// Reservation failure a degraded reply was built around
    pub fn error(&self) -> Option<&Dhcp6Error> {
        match self {
            Response::Degraded { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Addresses granted for a request, the requested IAIDs left without one,
/// and the pool's own failure when it failed as a whole
struct Grants {
    granted: Vec<IdentityAssociation>,
    missing: Vec<(Vec<u8>, String)>,
    pool_error: Option<String>,
}

impl Grants {
    /// Reason to report, present whenever reservation fell short
    fn failure(&self) -> Option<&str> {
        self.missing
            .first()
            .map(|(_, reason)| reason.as_str())
            .or(self.pool_error.as_deref())
    }
}

/// Builds DHCPv6 replies with server-wide lease lifetimes
#[derive(Debug, Clone, Copy)]
pub struct PacketBuilder {
    preferred_lifetime: u32,
    valid_lifetime: u32,
}

impl PacketBuilder {
    /// Create a builder; the preferred lifetime may not exceed the valid one
    pub fn new(preferred_lifetime: u32, valid_lifetime: u32) -> Result<Self, Dhcp6Error> {
        if preferred_lifetime > valid_lifetime {
            return Err(Dhcp6Error::InvalidConfig(format!(
                "preferred lifetime {}s exceeds valid lifetime {}s",
                preferred_lifetime, valid_lifetime
            )));
        }
        Ok(Self {
            preferred_lifetime,
            valid_lifetime,
        })
    }

    /// Preferred lifetime in seconds
    pub fn preferred_lifetime(&self) -> u32 {
        self.preferred_lifetime
    }

    /// Valid lifetime in seconds
    pub fn valid_lifetime(&self) -> u32 {
        self.valid_lifetime
    }

    /// Renewal timer: half the preferred lifetime
    pub fn t1(&self) -> u32 {
        (u64::from(self.preferred_lifetime) / 2) as u32
    }

    /// Rebinding timer: four fifths of the preferred lifetime
    pub fn t2(&self) -> u32 {
        (u64::from(self.preferred_lifetime) * 4 / 5) as u32
    }

    /// Build the reply to `request`.
    ///
    /// `Err` means no reply must be sent: the request is malformed or no
    /// boot URL could be resolved for the client.
    pub async fn build_response(
        &self,
        request: &Packet,
        server_duid: &[u8],
        boot_config: &dyn BootConfiguration,
        addresses: &dyn AddressPool,
    ) -> Result<Response, Dhcp6Error> {
        match request.msg_type {
            MessageType::Solicit => {
                self.solicit(request, server_duid, boot_config, addresses)
                    .await
            }
            MessageType::Request => {
                self.request(request, server_duid, boot_config, addresses)
                    .await
            }
            MessageType::InformationRequest => {
                self.information_request(request, server_duid, boot_config)
                    .await
            }
            MessageType::Release => self.release(request, server_duid, addresses).await,
            other => {
                debug!(msg_type = ?other, "No reply for message type");
                Ok(Response::Ignored)
            }
        }
    }

    async fn solicit(
        &self,
        request: &Packet,
        server_duid: &[u8],
        boot_config: &dyn BootConfiguration,
        addresses: &dyn AddressPool,
    ) -> Result<Response, Dhcp6Error> {
        let client_id = client_id(request)?;
        let interface_ids = request.options.ia_na_ids()?;
        let boot_url = resolve_boot_url(request, client_id, boot_config).await?;
        let grants = reserve(client_id, &interface_ids, addresses).await;

        if let Some(reason) = grants.failure() {
            warn!(reason, "No addresses available, advertising NoAddrsAvail");
            let reply = self.no_addrs_available(request, server_duid, client_id, reason);
            return Ok(Response::Degraded {
                reply,
                error: Dhcp6Error::AddressesUnavailable(reason.to_string()),
            });
        }

        info!(
            addresses = ?grants.granted.iter().map(|a| a.ip_address).collect::<Vec<_>>(),
            "Advertising"
        );
        let associations = self.address_options(&grants.granted);
        Ok(Response::Reply(self.boot_reply(
            MessageType::Advertise,
            request,
            server_duid,
            client_id,
            associations,
            &boot_url,
            boot_config.preference(),
            boot_config.recursive_dns(),
        )))
    }

    async fn request(
        &self,
        request: &Packet,
        server_duid: &[u8],
        boot_config: &dyn BootConfiguration,
        addresses: &dyn AddressPool,
    ) -> Result<Response, Dhcp6Error> {
        let client_id = client_id(request)?;
        let interface_ids = request.options.ia_na_ids()?;
        let boot_url = resolve_boot_url(request, client_id, boot_config).await?;
        let grants = reserve(client_id, &interface_ids, addresses).await;

        let mut associations = self.address_options(&grants.granted);
        for (interface_id, reason) in &grants.missing {
            associations.push(options::ia_na(
                interface_id,
                self.t1(),
                self.t2(),
                &options::status(StatusCode::NoAddrsAvail, reason),
            ));
        }

        let reply = self.boot_reply(
            MessageType::Reply,
            request,
            server_duid,
            client_id,
            associations,
            &boot_url,
            None,
            boot_config.recursive_dns(),
        );

        match grants.failure() {
            Some(reason) => {
                warn!(
                    granted = grants.granted.len(),
                    denied = grants.missing.len(),
                    reason,
                    "Replying with partial address assignment"
                );
                Ok(Response::Degraded {
                    reply,
                    error: Dhcp6Error::AddressesUnavailable(reason.to_string()),
                })
            }
            None => {
                info!(granted = grants.granted.len(), "Replying to request");
                Ok(Response::Reply(reply))
            }
        }
    }

    async fn information_request(
        &self,
        request: &Packet,
        server_duid: &[u8],
        boot_config: &dyn BootConfiguration,
    ) -> Result<Response, Dhcp6Error> {
        let client_id = client_id(request)?;
        let boot_url = resolve_boot_url(request, client_id, boot_config).await?;

        Ok(Response::Reply(self.boot_reply(
            MessageType::Reply,
            request,
            server_duid,
            client_id,
            Vec::new(),
            &boot_url,
            None,
            boot_config.recursive_dns(),
        )))
    }

    async fn release(
        &self,
        request: &Packet,
        server_duid: &[u8],
        addresses: &dyn AddressPool,
    ) -> Result<Response, Dhcp6Error> {
        let client_id = client_id(request)?;
        let interface_ids = request.options.ia_na_ids()?;

        // the client gets its acknowledgement whatever the pool says
        if let Err(e) = addresses
            .release_addresses(client_id, &interface_ids)
            .await
        {
            warn!(error = %e, "Releasing addresses failed");
        }

        let mut opts = Options::new();
        opts.add(DhcpOption::new(OPT_CLIENT_ID, client_id));
        opts.add(DhcpOption::new(OPT_SERVER_ID, server_duid));
        opts.add(options::status(StatusCode::Success, RELEASE_RECEIVED));
        Ok(Response::Reply(Packet::new(
            MessageType::Reply,
            request.transaction_id,
            opts,
        )))
    }

    fn no_addrs_available(
        &self,
        request: &Packet,
        server_duid: &[u8],
        client_id: &[u8],
        reason: &str,
    ) -> Packet {
        let mut opts = Options::new();
        opts.add(DhcpOption::new(OPT_CLIENT_ID, client_id));
        opts.add(DhcpOption::new(OPT_SERVER_ID, server_duid));
        opts.add(options::status(StatusCode::NoAddrsAvail, reason));
        Packet::new(MessageType::Advertise, request.transaction_id, opts)
    }

    fn address_options(&self, granted: &[IdentityAssociation]) -> Vec<DhcpOption> {
        granted
            .iter()
            .map(|association| {
                options::ia_na(
                    &association.interface_id,
                    self.t1(),
                    self.t2(),
                    &options::ia_addr(
                        association.ip_address,
                        self.preferred_lifetime,
                        self.valid_lifetime,
                    ),
                )
            })
            .collect()
    }

    #[allow(
        clippy::too_many_arguments,
        reason = "each argument is a distinct reply field"
    )]
    fn boot_reply(
        &self,
        msg_type: MessageType,
        request: &Packet,
        server_duid: &[u8],
        client_id: &[u8],
        associations: Vec<DhcpOption>,
        boot_url: &[u8],
        preference: Option<u8>,
        dns_servers: &[Ipv6Addr],
    ) -> Packet {
        let mut opts = Options::new();
        opts.add(DhcpOption::new(OPT_CLIENT_ID, client_id));
        for association in associations {
            opts.add(association);
        }
        opts.add(DhcpOption::new(OPT_SERVER_ID, server_duid));
        if request.options.client_arch_type() == ARCH_HTTP_CLIENT {
            opts.add(options::vendor_class_http_client());
        }
        opts.add(options::bootfile_url(boot_url));
        if let Some(preference) = preference {
            opts.add(options::preference(preference));
        }
        if !dns_servers.is_empty() {
            opts.add(options::dns_servers(dns_servers));
        }
        Packet::new(msg_type, request.transaction_id, opts)
    }
}

fn client_id(request: &Packet) -> Result<&[u8], Dhcp6Error> {
    request.options.client_id().ok_or_else(|| {
        Dhcp6Error::MalformedRequest(format!("{:?} has no client id option", request.msg_type))
    })
}

async fn resolve_boot_url(
    request: &Packet,
    client_id: &[u8],
    boot_config: &dyn BootConfiguration,
) -> Result<Vec<u8>, Dhcp6Error> {
    let identity = link_layer_address_or_id(client_id).ok_or_else(|| {
        Dhcp6Error::MalformedRequest(format!("client id too short: {} bytes", client_id.len()))
    })?;
    let arch = request.options.client_arch_type();

    let url = boot_config.boot_url(identity, arch).await?;
    if url.is_empty() {
        return Err(Dhcp6Error::BootConfiguration(format!(
            "empty boot URL for {:02x?} (arch {})",
            identity, arch
        )));
    }
    if url.len() > usize::from(u16::MAX) {
        return Err(Dhcp6Error::BootConfiguration(format!(
            "boot URL of {} bytes does not fit in an option",
            url.len()
        )));
    }
    debug!(arch, url = %String::from_utf8_lossy(&url), "Resolved boot URL");
    Ok(url)
}

/// Reserve addresses and pair every requested IAID the pool did not grant
/// with the pool's reason, or a generic one when the pool gave none.
async fn reserve(
    client_id: &[u8],
    interface_ids: &[Vec<u8>],
    addresses: &dyn AddressPool,
) -> Grants {
    let (reservations, pool_error) = match addresses
        .reserve_addresses(client_id, interface_ids)
        .await
    {
        Ok(reservations) => (reservations, None),
        Err(e) => {
            warn!(error = %e, "Address reservation failed");
            (Vec::new(), Some(e.message()))
        }
    };

    let requested: HashSet<&[u8]> = interface_ids.iter().map(Vec::as_slice).collect();
    let mut granted = Vec::new();
    let mut denials = HashMap::new();
    for reservation in reservations {
        match reservation {
            Reservation::Granted(association) => {
                if requested.contains(association.interface_id.as_slice()) {
                    granted.push(association);
                } else {
                    warn!(interface_id = ?association.interface_id, "Pool granted an unrequested IAID");
                }
            }
            Reservation::Denied {
                interface_id,
                reason,
            } => {
                denials.entry(interface_id).or_insert(reason);
            }
        }
    }

    let missing = ias_without_addresses(&granted, interface_ids)
        .into_iter()
        .map(|interface_id| {
            let reason = denials
                .get(interface_id)
                .or(pool_error.as_ref())
                .cloned()
                .unwrap_or_else(|| NO_ADDRESS_REASON.to_string());
            (interface_id.to_vec(), reason)
        })
        .collect();

    Grants {
        granted,
        missing,
        pool_error,
    }
}

/// Requested IAIDs with no granted association, in request order.
///
/// Set membership hashes the IAID bytes and confirms on full equality.
pub(crate) fn ias_without_addresses<'a>(
    granted: &[IdentityAssociation],
    requested: &'a [Vec<u8>],
) -> Vec<&'a [u8]> {
    let with_addresses: HashSet<&[u8]> = granted
        .iter()
        .map(|association| association.interface_id.as_slice())
        .collect();
    requested
        .iter()
        .map(Vec::as_slice)
        .filter(|interface_id| !with_addresses.contains(interface_id))
        .collect()
}
