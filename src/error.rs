use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

use crate::icmp::type_name;

/// Failures of a trace run or of a single hop's probe exchange.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("cannot resolve '{target}': {reason}")]
    AddressResolution { target: String, reason: String },

    #[error("socket {action} failed: {source}")]
    Socket {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("short write: sent {sent} of {expected} bytes")]
    TransmissionSize { sent: usize, expected: usize },

    #[error("no reply within {waited:?}")]
    Timeout { waited: Duration },

    #[error("malformed reply: {reason}")]
    ProtocolParse { reason: String },

    #[error("got {} (type {icmp_type}, code {code}) from {peer}; invalid ICMP type", describe(.icmp_type))]
    UnexpectedIcmpType { icmp_type: u8, code: u8, peer: Ipv4Addr },
}

fn describe(icmp_type: &u8) -> &'static str {
    type_name(*icmp_type)
}

impl TraceError {
    pub fn socket(action: &'static str, source: std::io::Error) -> Self {
        TraceError::Socket { action, source }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        TraceError::ProtocolParse { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_type_message_names_type() {
        let err = TraceError::UnexpectedIcmpType {
            icmp_type: 3,
            code: 1,
            peer: Ipv4Addr::new(10, 0, 0, 1),
        };
        let text = err.to_string();
        assert!(text.contains("destination unreachable"));
        assert!(text.contains("type 3, code 1"));
        assert!(text.contains("10.0.0.1"));
    }

    #[test]
    fn test_short_write_message() {
        let err = TraceError::TransmissionSize { sent: 10, expected: 64 };
        assert_eq!(err.to_string(), "short write: sent 10 of 64 bytes");
    }
}
