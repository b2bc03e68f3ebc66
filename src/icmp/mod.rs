pub mod packet;
pub mod socket;

pub use packet::*;
pub use socket::*;

pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_SOURCE_QUENCH: u8 = 4;
pub const ICMP_REDIRECT: u8 = 5;
pub const ICMP_TIME_EXCEEDED: u8 = 11;
pub const ICMP_PARAMETER_PROBLEM: u8 = 12;

/// How a decoded reply relates to the probe that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The destination answered the echo request.
    EchoReply,
    /// A router on the path dropped the probe when its TTL ran out.
    TimeExceeded,
    Other { icmp_type: u8, code: u8 },
}

impl ReplyKind {
    pub fn classify(icmp_type: u8, code: u8) -> Self {
        match icmp_type {
            ICMP_ECHO_REPLY => ReplyKind::EchoReply,
            ICMP_TIME_EXCEEDED => ReplyKind::TimeExceeded,
            _ => ReplyKind::Other { icmp_type, code },
        }
    }
}

/// ICMPv4 error messages quote the offending datagram after their header.
pub fn carries_original_datagram(icmp_type: u8) -> bool {
    matches!(
        icmp_type,
        ICMP_DEST_UNREACHABLE
            | ICMP_SOURCE_QUENCH
            | ICMP_REDIRECT
            | ICMP_TIME_EXCEEDED
            | ICMP_PARAMETER_PROBLEM
    )
}

pub fn type_name(icmp_type: u8) -> &'static str {
    match icmp_type {
        ICMP_ECHO_REPLY => "echo reply",
        ICMP_DEST_UNREACHABLE => "destination unreachable",
        ICMP_SOURCE_QUENCH => "source quench",
        ICMP_REDIRECT => "redirect",
        ICMP_ECHO_REQUEST => "echo request",
        ICMP_TIME_EXCEEDED => "time exceeded",
        ICMP_PARAMETER_PROBLEM => "parameter problem",
        13 => "timestamp",
        14 => "timestamp reply",
        _ => "unknown ICMP message",
    }
}
