//! DUID handling.
//!
//! Boot configuration is keyed on the client's link-layer address when its
//! DUID carries one, and on the opaque DUID body otherwise.

use chrono::{DateTime, Utc};

/// Link-layer address plus time
pub const DUID_TYPE_LLT: u16 = 1;
/// Vendor-assigned, based on enterprise number
pub const DUID_TYPE_EN: u16 = 2;
/// Link-layer address
pub const DUID_TYPE_LL: u16 = 3;

/// Hardware type of Ethernet (IANA ARP parameters)
pub const HW_TYPE_ETHERNET: u16 = 1;

/// 2000-01-01T00:00:00Z, the DUID-LLT time base
const DUID_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Link-layer address (DUID-LLT, DUID-LL) or opaque identifier (any other
/// DUID type) carried by a client identifier.
///
/// Returns `None` when the identifier is shorter than its type's fixed
/// header.
pub fn link_layer_address_or_id(client_id: &[u8]) -> Option<&[u8]> {
    if client_id.len() < 2 {
        return None;
    }
    let skip = match u16::from_be_bytes([client_id[0], client_id[1]]) {
        // type, hardware type, time
        DUID_TYPE_LLT => 8,
        // type, hardware type
        DUID_TYPE_LL => 4,
        _ => 2,
    };
    client_id.get(skip..)
}

/// DUID-LLT for an Ethernet interface, stamped with `now`.
pub fn duid_llt(mac: &[u8], now: DateTime<Utc>) -> Vec<u8> {
    // modulo 2^32, as the DUID-LLT time field wraps
    let seconds = (now.timestamp() - DUID_EPOCH_UNIX_SECS).max(0) as u32;

    let mut duid = Vec::with_capacity(8 + mac.len());
    duid.extend_from_slice(&DUID_TYPE_LLT.to_be_bytes());
    duid.extend_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
    duid.extend_from_slice(&seconds.to_be_bytes());
    duid.extend_from_slice(mac);
    duid
}
