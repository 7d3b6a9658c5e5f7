//! DHCPv6 option codes and encoders.
//!
//! Each encoder returns a complete [`DhcpOption`]. Container options
//! (IA-NA, IA-address) carry their nested options already marshalled
//! into the payload, so the caller only ever appends flat entries to a
//! packet's option list.

use crate::packet::{DhcpOption, OPTION_HEADER_LEN};
use std::net::Ipv6Addr;

/// Client identifier (DUID)
pub const OPT_CLIENT_ID: u16 = 1;
/// Server identifier (DUID)
pub const OPT_SERVER_ID: u16 = 2;
/// Identity association for non-temporary addresses
pub const OPT_IA_NA: u16 = 3;
/// Identity association for temporary addresses
pub const OPT_IA_TA: u16 = 4;
/// IA address, nested in an IA-NA
pub const OPT_IA_ADDR: u16 = 5;
/// Option request option
pub const OPT_ORO: u16 = 6;
/// Server preference
pub const OPT_PREFERENCE: u16 = 7;
/// Elapsed time
pub const OPT_ELAPSED_TIME: u16 = 8;
/// Status code and message
pub const OPT_STATUS_CODE: u16 = 13;
/// Vendor class
pub const OPT_VENDOR_CLASS: u16 = 16;
/// Recursive DNS servers
pub const OPT_DNS_SERVERS: u16 = 23;
/// Boot file URL
pub const OPT_BOOTFILE_URL: u16 = 59;
/// Boot file parameters
pub const OPT_BOOTFILE_PARAM: u16 = 60;
/// Client system architecture type
pub const OPT_CLIENT_ARCH_TYPE: u16 = 61;

/// Client architecture code of a UEFI HTTP boot client (RFC 4578 registry)
pub const ARCH_HTTP_CLIENT: u16 = 0x10;

/// Fixed part of an IA-NA payload: IAID, T1, T2
pub const IA_NA_HEADER_LEN: usize = 12;

/// Largest payload an option length field can describe
pub const MAX_OPTION_LEN: usize = u16::MAX as usize;

/// Longest status message that still fits once nested in an IA-NA
pub const MAX_STATUS_MESSAGE_LEN: usize =
    MAX_OPTION_LEN - IA_NA_HEADER_LEN - OPTION_HEADER_LEN - 2;

/// Most recursive DNS servers one option can carry
pub const MAX_DNS_SERVERS: usize = MAX_OPTION_LEN / 16;

const HTTP_CLIENT_VENDOR_CLASS: &[u8] = b"HTTPClient";

/// DHCPv6 status codes (RFC 8415 section 21.13)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    /// Success
    Success = 0,
    /// Failure, reason unspecified
    UnspecFail = 1,
    /// No addresses available to assign
    NoAddrsAvail = 2,
    /// Client record unavailable
    NoBinding = 3,
    /// Prefix not appropriate for the link
    NotOnLink = 4,
    /// Client must use multicast
    UseMulticast = 5,
}

/// IA-NA container: IAID, T1, T2 and one nested option (IA-address or status).
pub fn ia_na(interface_id: &[u8], t1: u32, t2: u32, nested: &DhcpOption) -> DhcpOption {
    let mut value = Vec::with_capacity(interface_id.len() + 8 + nested.wire_len());
    value.extend_from_slice(interface_id);
    value.extend_from_slice(&t1.to_be_bytes());
    value.extend_from_slice(&t2.to_be_bytes());
    nested.marshal_into(&mut value);
    DhcpOption::new(OPT_IA_NA, value)
}

/// IA-address: address, preferred lifetime, valid lifetime; no nested options.
pub fn ia_addr(address: Ipv6Addr, preferred_lifetime: u32, valid_lifetime: u32) -> DhcpOption {
    let mut value = Vec::with_capacity(24);
    value.extend_from_slice(&address.octets());
    value.extend_from_slice(&preferred_lifetime.to_be_bytes());
    value.extend_from_slice(&valid_lifetime.to_be_bytes());
    DhcpOption::new(OPT_IA_ADDR, value)
}

/// Status code followed by the raw message; the option length delimits the text.
///
/// Messages longer than [`MAX_STATUS_MESSAGE_LEN`] bytes are cut at the
/// last character boundary that fits.
pub fn status(code: StatusCode, message: &str) -> DhcpOption {
    let message = truncate_at_char_boundary(message, MAX_STATUS_MESSAGE_LEN);
    let mut value = Vec::with_capacity(2 + message.len());
    value.extend_from_slice(&(code as u16).to_be_bytes());
    value.extend_from_slice(message.as_bytes());
    DhcpOption::new(OPT_STATUS_CODE, value)
}

/// Vendor class announcing "HTTPClient" under enterprise number 0.
///
/// UEFI HTTP boot firmware ignores offers that lack it.
pub fn vendor_class_http_client() -> DhcpOption {
    let mut value = Vec::with_capacity(4 + 2 + HTTP_CLIENT_VENDOR_CLASS.len());
    value.extend_from_slice(&0u32.to_be_bytes());
    value.extend_from_slice(&(HTTP_CLIENT_VENDOR_CLASS.len() as u16).to_be_bytes());
    value.extend_from_slice(HTTP_CLIENT_VENDOR_CLASS);
    DhcpOption::new(OPT_VENDOR_CLASS, value)
}

/// Recursive DNS servers, 16 bytes each, in list order.
///
/// Only the first [`MAX_DNS_SERVERS`] entries are encoded.
pub fn dns_servers(servers: &[Ipv6Addr]) -> DhcpOption {
    let value: Vec<u8> = servers
        .iter()
        .take(MAX_DNS_SERVERS)
        .flat_map(Ipv6Addr::octets)
        .collect();
    DhcpOption::new(OPT_DNS_SERVERS, value)
}

/// Boot file URL, passed through as opaque bytes
pub fn bootfile_url(url: &[u8]) -> DhcpOption {
    DhcpOption::new(OPT_BOOTFILE_URL, url)
}

/// Single-byte server preference
pub fn preference(value: u8) -> DhcpOption {
    DhcpOption::new(OPT_PREFERENCE, [value])
}

fn truncate_at_char_boundary(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
