use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::TraceError;
use crate::icmp::carries_original_datagram;

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_HEADER_SIZE: usize = 8;
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;

const PAYLOAD_PATTERN: &[u8] = b"rutrace-icmp!";
const IPPROTO_ICMP: u8 = 1;

/// An ICMPv4 message: the fixed 8-byte header plus everything after it.
///
/// For echo messages the second header word holds the identifier and
/// sequence number. For error messages it is unused (or type specific) and
/// `payload` quotes the IPv4 header and first 8 bytes of the datagram that
/// caused the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    /// Builds an echo message of the given type with `payload_size` bytes of
    /// filler, repeating a fixed pattern and cutting the last copy short.
    pub fn echo(icmp_type: u8, identifier: u16, sequence: u16, payload_size: usize) -> Self {
        let payload = PAYLOAD_PATTERN
            .iter()
            .copied()
            .cycle()
            .take(payload_size)
            .collect();

        let mut packet = Self {
            icmp_type,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload,
        };

        packet.calculate_checksum();
        packet
    }

    pub fn new_echo_request(identifier: u16, sequence: u16, payload_size: usize) -> Self {
        Self::echo(ICMP_ECHO_REQUEST, identifier, sequence, payload_size)
    }

    /// Decodes a raw ICMPv4 message (IP header already removed).
    pub fn from_bytes(data: &[u8]) -> Result<Self, TraceError> {
        if data.len() < ICMP_HEADER_SIZE {
            return Err(TraceError::parse(format!(
                "ICMP message too short: {} bytes, need at least {}",
                data.len(),
                ICMP_HEADER_SIZE
            )));
        }

        let mut cursor = Cursor::new(data);
        let truncated = |e: std::io::Error| TraceError::parse(e.to_string());
        let icmp_type = cursor.read_u8().map_err(truncated)?;
        let code = cursor.read_u8().map_err(truncated)?;
        let checksum = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        let identifier = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        let sequence = cursor.read_u16::<BigEndian>().map_err(truncated)?;

        let mut payload = Vec::new();
        cursor.read_to_end(&mut payload).map_err(truncated)?;

        Ok(Self {
            icmp_type,
            code,
            checksum,
            identifier,
            sequence,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; ICMP_HEADER_SIZE + self.payload.len()];
        bytes[0] = self.icmp_type;
        bytes[1] = self.code;
        BigEndian::write_u16(&mut bytes[2..4], self.checksum);
        BigEndian::write_u16(&mut bytes[4..6], self.identifier);
        BigEndian::write_u16(&mut bytes[6..8], self.sequence);
        bytes[ICMP_HEADER_SIZE..].copy_from_slice(&self.payload);
        bytes
    }

    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let bytes = self.to_bytes();
        self.checksum = Self::compute_checksum(&bytes);
    }

    fn compute_checksum(data: &[u8]) -> u16 {
        let mut sum: u32 = data
            .chunks(2)
            .map(|pair| match pair {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                [hi] => (*hi as u32) << 8,
                _ => 0,
            })
            .sum();

        while (sum >> 16) != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        !sum as u16
    }

    pub fn verify_checksum(&self) -> bool {
        Self::compute_checksum(&self.to_bytes()) == 0
    }

    /// The echo reply a destination would send back for this request.
    pub fn into_reply(mut self) -> Self {
        self.icmp_type = ICMP_ECHO_REPLY;
        self.calculate_checksum();
        self
    }

    /// Which echo request, if any, this message answers.
    ///
    /// Echo replies carry the identifier and sequence directly. ICMP error
    /// messages quote the datagram that triggered them: a quote that is
    /// not an ICMP echo request belongs to other traffic.
    pub fn origin(&self) -> Origin {
        if self.icmp_type == ICMP_ECHO_REPLY {
            return Origin::Echo {
                identifier: self.identifier,
                sequence: self.sequence,
            };
        }
        if !carries_original_datagram(self.icmp_type) {
            return Origin::Unknown;
        }

        let quoted = &self.payload;
        if quoted.len() < 20 || quoted[0] >> 4 != 4 {
            return Origin::Unknown;
        }
        if quoted[9] != IPPROTO_ICMP {
            return Origin::Foreign;
        }
        let header_len = ((quoted[0] & 0x0f) as usize) * 4;
        let Some(inner) = quoted.get(header_len..header_len + ICMP_HEADER_SIZE) else {
            return Origin::Unknown;
        };
        if inner[0] != ICMP_ECHO_REQUEST {
            return Origin::Foreign;
        }
        Origin::Echo {
            identifier: BigEndian::read_u16(&inner[4..6]),
            sequence: BigEndian::read_u16(&inner[6..8]),
        }
    }
}

/// Ownership of a received ICMP message, see [`IcmpPacket::origin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Answers the echo request with this identifier and sequence.
    Echo { identifier: u16, sequence: u16 },
    /// Provably triggered by something other than an echo request.
    Foreign,
    /// Nothing in the message tells whose it is.
    Unknown,
}
