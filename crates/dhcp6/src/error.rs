//! DHCPv6 errors

use thiserror::Error;

/// Errors that can occur while decoding or answering DHCPv6 traffic
#[derive(Debug, Error)]
pub enum Dhcp6Error {
    /// Datagram could not be decoded (truncated header or option)
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Packet decoded, but an option the reply depends on is missing or truncated
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Packet rejected by the inbound acceptance checks
    #[error("Discarded packet: {0}")]
    Discarded(String),

    /// No boot URL could be resolved for the client
    #[error("Boot configuration error: {0}")]
    BootConfiguration(String),

    /// HTTP request to the boot API failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Address pool failed as a whole
    #[error("Address pool error: {0}")]
    AddressPool(String),

    /// One or more identity associations were not granted an address.
    ///
    /// The message is the reservation layer's reason, unchanged, because
    /// it is also the text placed in the wire status option.
    #[error("{0}")]
    AddressesUnavailable(String),

    /// Invalid builder or pool configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Dhcp6Error {
    /// The underlying message, without the variant's display prefix
    pub fn message(&self) -> String {
        match self {
            Dhcp6Error::MalformedPacket(message)
            | Dhcp6Error::MalformedRequest(message)
            | Dhcp6Error::Discarded(message)
            | Dhcp6Error::BootConfiguration(message)
            | Dhcp6Error::AddressPool(message)
            | Dhcp6Error::AddressesUnavailable(message)
            | Dhcp6Error::InvalidConfig(message) => message.clone(),
            Dhcp6Error::Http(e) => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_drops_display_prefix() {
        let error = Dhcp6Error::AddressPool("backend down".to_string());
        assert_eq!(error.to_string(), "Address pool error: backend down");
        assert_eq!(error.message(), "backend down");
    }
}
