//! DHCPv6 Boot Responder
//!
//! Reply construction for IPv6 network boot: answers Solicit, Request,
//! InformationRequest and Release messages with leased addresses, a boot
//! file URL, recursive DNS servers and status information.
//!
//! # Example
//!
//! ```no_run
//! use dhcp6::{Packet, PacketBuilder, RandomAddressPool, StaticBootConfiguration};
//!
//! # async fn example(datagram: &[u8], server_duid: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let builder = PacketBuilder::new(550, 600)?;
//! let boot_config = StaticBootConfiguration::new(
//!     "http://[2001:db8::1]/uefi/shim.efi",
//!     "http://[2001:db8::1]/boot.ipxe",
//!     None,
//!     vec![],
//! );
//! let pool = RandomAddressPool::new("2001:db8::100".parse()?, 50, 600)?;
//!
//! let request = Packet::unmarshal(datagram)?;
//! let response = builder
//!     .build_response(&request, server_duid, &boot_config, &pool)
//!     .await?;
//! if let Some(reply) = response.into_reply() {
//!     let _bytes = reply.marshal();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Collaborators
//!
//! - **BootConfiguration**: static URLs, a boot table file or a boot API lookup
//! - **AddressPool**: lease state; an in-memory random pool is provided

pub mod address_pool;
pub mod boot_config;
pub mod builder;
pub mod error;
pub mod identity;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod options;
pub mod packet;


pub use address_pool::{AddressPool, IdentityAssociation, RandomAddressPool, Reservation};
pub use boot_config::{
    ApiBootConfiguration, BootConfiguration, FileBootConfiguration, StaticBootConfiguration,
};
pub use builder::{PacketBuilder, Response};
pub use error::Dhcp6Error;
pub use identity::{duid_llt, link_layer_address_or_id};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockAddressPool, MockBootConfiguration};
pub use options::StatusCode;
pub use packet::{DhcpOption, MessageType, Options, Packet};
