//! DHCPv6 packet model and wire codec.
//!
//! A packet is a message type, a 3-byte transaction ID and an ordered list
//! of options. Option codes may repeat (one IA-NA per interface association)
//! and the order of the list is the order on the wire.

use crate::error::Dhcp6Error;
use crate::options::{
    IA_NA_HEADER_LEN, OPT_BOOTFILE_URL, OPT_CLIENT_ARCH_TYPE, OPT_CLIENT_ID, OPT_IA_NA, OPT_IA_TA,
    OPT_ORO, OPT_SERVER_ID,
};
pub use dhcproto::v6::MessageType;

/// msg-type (1 byte) + transaction-id (3 bytes)
pub const HEADER_LEN: usize = 4;

/// option-code (2 bytes) + option-len (2 bytes)
pub const OPTION_HEADER_LEN: usize = 4;

/// A single (code, payload) option entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    /// Option code
    pub code: u16,
    /// Payload, without the code and length header
    pub value: Vec<u8>,
}

impl DhcpOption {
    /// Option with `code` carrying `value`
    pub fn new(code: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    /// Size of the option on the wire, header included
    pub fn wire_len(&self) -> usize {
        OPTION_HEADER_LEN + self.value.len()
    }

    /// Append code, length and payload to `buf`.
    ///
    /// The payload must fit the 16-bit length field; the encoders in
    /// [`crate::options`] keep it within [`crate::options::MAX_OPTION_LEN`].
    pub fn marshal_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(
            self.value.len() <= usize::from(u16::MAX),
            "option {} payload of {} bytes overflows its length field",
            self.code,
            self.value.len()
        );
        #[allow(clippy::cast_possible_truncation, reason = "payload length checked above")]
        let len = self.value.len() as u16;
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.value);
    }
}

/// Ordered multiset of options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(Vec<DhcpOption>);

impl Options {
    /// Empty option list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an option, keeping insertion order
    pub fn add(&mut self, option: DhcpOption) {
        self.0.push(option);
    }

    /// Payload of the first option with `code`
    pub fn get(&self, code: u16) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|o| o.code == code)
            .map(|o| o.value.as_slice())
    }

    /// Payloads of every option with `code`, in wire order
    pub fn get_all(&self, code: u16) -> impl Iterator<Item = &[u8]> {
        self.0
            .iter()
            .filter(move |o| o.code == code)
            .map(|o| o.value.as_slice())
    }

    /// Number of options with `code`
    pub fn count(&self, code: u16) -> usize {
        self.0.iter().filter(|o| o.code == code).count()
    }

    /// Options in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, DhcpOption> {
        self.0.iter()
    }

    /// Total number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Client DUID
    pub fn client_id(&self) -> Option<&[u8]> {
        self.get(OPT_CLIENT_ID)
    }

    /// Server DUID
    pub fn server_id(&self) -> Option<&[u8]> {
        self.get(OPT_SERVER_ID)
    }

    /// Whether a client id is present
    pub fn has_client_id(&self) -> bool {
        self.client_id().is_some()
    }

    /// Whether a server id is present
    pub fn has_server_id(&self) -> bool {
        self.server_id().is_some()
    }

    /// Whether at least one IA-NA is present
    pub fn has_ia_na(&self) -> bool {
        self.get(OPT_IA_NA).is_some()
    }

    /// Whether at least one IA-TA is present
    pub fn has_ia_ta(&self) -> bool {
        self.get(OPT_IA_TA).is_some()
    }

    /// IAIDs of every IA-NA option, in request order.
    ///
    /// An IA-NA shorter than its fixed header cannot carry an IAID and
    /// makes the request malformed.
    pub fn ia_na_ids(&self) -> Result<Vec<Vec<u8>>, Dhcp6Error> {
        self.get_all(OPT_IA_NA)
            .map(|value| {
                if value.len() < IA_NA_HEADER_LEN {
                    return Err(Dhcp6Error::MalformedRequest(format!(
                        "IA_NA option too short: {} bytes",
                        value.len()
                    )));
                }
                Ok(value[0..4].to_vec())
            })
            .collect()
    }

    /// First architecture type the client declared, or 0 when it declared none
    pub fn client_arch_type(&self) -> u16 {
        match self.get(OPT_CLIENT_ARCH_TYPE) {
            Some(value) if value.len() >= 2 => u16::from_be_bytes([value[0], value[1]]),
            _ => 0,
        }
    }

    /// Option codes listed in the client's option request option
    pub fn requested_options(&self) -> Vec<u16> {
        self.get(OPT_ORO)
            .map(|value| {
                value
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the option request lists the boot file URL
    pub fn requested_bootfile_url(&self) -> bool {
        self.requested_options().contains(&OPT_BOOTFILE_URL)
    }
}

impl<'a> IntoIterator for &'a Options {
    type Item = &'a DhcpOption;
    type IntoIter = std::slice::Iter<'a, DhcpOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// One DHCPv6 client/server message
#[derive(Debug, Clone)]
pub struct Packet {
    /// Message type
    pub msg_type: MessageType,
    /// Transaction id echoed in the reply
    pub transaction_id: [u8; 3],
    /// Options in wire order
    pub options: Options,
}

impl Packet {
    /// Assemble a packet from its parts
    pub fn new(msg_type: MessageType, transaction_id: [u8; 3], options: Options) -> Self {
        Self {
            msg_type,
            transaction_id,
            options,
        }
    }

    /// Decode a client/server message (relay messages are not unwrapped)
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, Dhcp6Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Dhcp6Error::MalformedPacket(format!(
                "packet too short: {} bytes",
                bytes.len()
            )));
        }

        let msg_type = MessageType::from(bytes[0]);
        let transaction_id = [bytes[1], bytes[2], bytes[3]];

        let mut options = Options::new();
        let mut rest = &bytes[HEADER_LEN..];
        while !rest.is_empty() {
            if rest.len() < OPTION_HEADER_LEN {
                return Err(Dhcp6Error::MalformedPacket(format!(
                    "truncated option header: {} trailing bytes",
                    rest.len()
                )));
            }
            let code = u16::from_be_bytes([rest[0], rest[1]]);
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let end = OPTION_HEADER_LEN + len;
            if rest.len() < end {
                return Err(Dhcp6Error::MalformedPacket(format!(
                    "option {} declares {} bytes, {} available",
                    code,
                    len,
                    rest.len() - OPTION_HEADER_LEN
                )));
            }
            options.add(DhcpOption::new(code, &rest[OPTION_HEADER_LEN..end]));
            rest = &rest[end..];
        }

        Ok(Self {
            msg_type,
            transaction_id,
            options,
        })
    }

    /// Encode to wire format: type, transaction id, then options in order
    pub fn marshal(&self) -> Vec<u8> {
        let len = HEADER_LEN + self.options.iter().map(DhcpOption::wire_len).sum::<usize>();
        let mut buf = Vec::with_capacity(len);
        buf.push(u8::from(self.msg_type));
        buf.extend_from_slice(&self.transaction_id);
        for option in &self.options {
            option.marshal_into(&mut buf);
        }
        buf
    }

    /// Acceptance checks applied before a reply is built.
    ///
    /// Only clients asking for a boot file URL are answered; Request must be
    /// addressed to this server, Solicit must not be addressed to anyone.
    pub fn should_discard(&self, server_duid: &[u8]) -> Result<(), Dhcp6Error> {
        let options = &self.options;
        let discard = |reason: &str| {
            Err(Dhcp6Error::Discarded(format!(
                "{:?} packet {}",
                self.msg_type, reason
            )))
        };

        match self.msg_type {
            MessageType::Solicit => {
                if !options.requested_bootfile_url() {
                    return discard("doesn't request the boot file url option");
                }
                if !options.has_client_id() {
                    return discard("has no client id option");
                }
                if options.has_server_id() {
                    return discard("has a server id option");
                }
                Ok(())
            }
            MessageType::Request => {
                if !options.requested_bootfile_url() {
                    return discard("doesn't request the boot file url option");
                }
                if !options.has_client_id() {
                    return discard("has no client id option");
                }
                match options.server_id() {
                    None => discard("has no server id option"),
                    Some(id) if id != server_duid => discard("is addressed to another server"),
                    Some(_) => Ok(()),
                }
            }
            MessageType::InformationRequest => {
                if !options.requested_bootfile_url() {
                    return discard("doesn't request the boot file url option");
                }
                if options.has_ia_na() || options.has_ia_ta() {
                    return discard("has an IA_NA or IA_TA option");
                }
                match options.server_id() {
                    Some(id) if id != server_duid => discard("is addressed to another server"),
                    _ => Ok(()),
                }
            }
            MessageType::Release => Ok(()),
            _ => discard("has an unhandled message type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OPT_ELAPSED_TIME;

    fn oro(codes: &[u16]) -> DhcpOption {
        let value: Vec<u8> = codes.iter().flat_map(|c| c.to_be_bytes()).collect();
        DhcpOption::new(OPT_ORO, value)
    }

    fn ia_na_request(iaid: [u8; 4]) -> DhcpOption {
        let mut value = iaid.to_vec();
        value.extend_from_slice(&[0; 8]);
        DhcpOption::new(OPT_IA_NA, value)
    }

    fn solicit() -> Packet {
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_CLIENT_ID, vec![0, 3, 0, 1, 1, 2, 3, 4, 5, 6]));
        options.add(oro(&[OPT_BOOTFILE_URL]));
        Packet::new(MessageType::Solicit, [1, 2, 3], options)
    }

    #[test]
    fn test_unmarshal_preserves_order_and_duplicates() {
        let bytes = vec![
            1, 0xaa, 0xbb, 0xcc, // solicit, xid
            0, 1, 0, 2, 9, 9, // client id
            0, 3, 0, 12, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, // ia_na 1
            0, 8, 0, 2, 0, 0, // elapsed time
            0, 3, 0, 12, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, // ia_na 2
        ];
        let packet = Packet::unmarshal(&bytes).unwrap();
        assert!(matches!(packet.msg_type, MessageType::Solicit));
        assert_eq!(packet.transaction_id, [0xaa, 0xbb, 0xcc]);
        assert_eq!(packet.options.len(), 4);
        let codes: Vec<u16> = packet.options.iter().map(|o| o.code).collect();
        assert_eq!(codes, vec![OPT_CLIENT_ID, OPT_IA_NA, OPT_ELAPSED_TIME, OPT_IA_NA]);
        assert_eq!(
            packet.options.ia_na_ids().unwrap(),
            vec![vec![0, 0, 0, 1], vec![0, 0, 0, 2]]
        );
        assert_eq!(packet.marshal(), bytes);
    }

    #[test]
    fn test_unmarshal_rejects_truncated_input() {
        assert!(matches!(
            Packet::unmarshal(&[1, 0, 0]),
            Err(Dhcp6Error::MalformedPacket(_))
        ));
        assert!(matches!(
            Packet::unmarshal(&[1, 0, 0, 0, 0, 1, 0]),
            Err(Dhcp6Error::MalformedPacket(_))
        ));
        // declares 4 bytes, carries 2
        assert!(matches!(
            Packet::unmarshal(&[1, 0, 0, 0, 0, 1, 0, 4, 1, 2]),
            Err(Dhcp6Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_short_ia_na_is_malformed_request() {
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_IA_NA, vec![0, 0, 0, 1]));
        assert!(matches!(
            options.ia_na_ids(),
            Err(Dhcp6Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_client_arch_type() {
        let mut options = Options::new();
        assert_eq!(options.client_arch_type(), 0);
        options.add(DhcpOption::new(OPT_CLIENT_ARCH_TYPE, vec![0, 0x10, 0, 7]));
        assert_eq!(options.client_arch_type(), 0x10);
    }

    #[test]
    fn test_should_discard_solicit() {
        let packet = solicit();
        assert!(packet.should_discard(&[0, 1]).is_ok());

        let mut with_server = packet.clone();
        with_server.options.add(DhcpOption::new(OPT_SERVER_ID, vec![0, 1]));
        assert!(matches!(
            with_server.should_discard(&[0, 1]),
            Err(Dhcp6Error::Discarded(_))
        ));

        let mut no_oro = Options::new();
        no_oro.add(DhcpOption::new(OPT_CLIENT_ID, vec![0, 3, 0, 1]));
        let packet = Packet::new(MessageType::Solicit, [0; 3], no_oro);
        assert!(packet.should_discard(&[0, 1]).is_err());
    }

    #[test]
    fn test_should_discard_request_for_other_server() {
        let mut packet = solicit();
        packet.msg_type = MessageType::Request;
        assert!(packet.should_discard(&[0, 1]).is_err(), "no server id");

        packet.options.add(DhcpOption::new(OPT_SERVER_ID, vec![0, 2]));
        assert!(packet.should_discard(&[0, 1]).is_err(), "other server");
        assert!(packet.should_discard(&[0, 2]).is_ok());
    }

    #[test]
    fn test_should_discard_information_request_with_ia() {
        let mut packet = solicit();
        packet.msg_type = MessageType::InformationRequest;
        assert!(packet.should_discard(&[0, 1]).is_ok());

        packet.options.add(ia_na_request([0, 0, 0, 1]));
        assert!(packet.should_discard(&[0, 1]).is_err());
    }

    #[test]
    fn test_should_discard_unknown_type() {
        let mut packet = solicit();
        packet.msg_type = MessageType::Renew;
        assert!(packet.should_discard(&[0, 1]).is_err());

        packet.msg_type = MessageType::Release;
        assert!(packet.should_discard(&[0, 1]).is_ok());
    }
}
