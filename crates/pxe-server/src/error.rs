//! PXE server errors

use dhcp6::Dhcp6Error;
use thiserror::Error;

/// Errors raised while configuring or running the server
#[derive(Debug, Error)]
pub enum PxeError {
    /// Packet handling or collaborator setup failed
    #[error("DHCP error: {0}")]
    Dhcp(#[from] Dhcp6Error),

    /// Socket or file system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid setting
    #[error("Configuration error: {0}")]
    Configuration(String),
}
