//! PXE Boot Server
//!
//! DHCPv6 server for IPv6 network boot. Answers PXE and UEFI HTTP boot
//! clients with a leased address, a boot file URL and recursive DNS
//! servers, using the reply construction in the `dhcp6` crate.
//!
//! Configuration comes from `PXE_` environment variables; see
//! [`config::ServerConfig`].

pub mod config;
pub mod dhcp;
pub mod error;
pub mod server;

mod dhcp_test;

pub use config::*;
pub use dhcp::*;
pub use error::*;
pub use server::*;
