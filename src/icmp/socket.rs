use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::TraceError;
use crate::probe::{Deadline, ProbeSocket, SocketProvider};

const RECV_BUFFER_SIZE: usize = 1500;

/// Raw ICMPv4 socket owned by one hop's exchange. Closed on drop.
pub struct IcmpSocket {
    socket: Socket,
}

impl IcmpSocket {
    pub fn new() -> Result<Self, TraceError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(|e| TraceError::socket("create (raw sockets need root or CAP_NET_RAW)", e))?;

        socket
            .set_nonblocking(false)
            .map_err(|e| TraceError::socket("configure", e))?;

        Ok(Self { socket })
    }

    pub fn bind(&self, source: Ipv4Addr) -> Result<(), TraceError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(source, 0));
        self.socket
            .bind(&addr.into())
            .map_err(|e| TraceError::socket("bind", e))
    }
}

impl ProbeSocket for IcmpSocket {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), TraceError> {
        self.socket
            .set_ttl(ttl as u32)
            .map_err(|e| TraceError::socket("set TTL", e))
    }

    fn send_to(&mut self, packet: &[u8], destination: Ipv4Addr) -> Result<usize, TraceError> {
        let target: SockAddr = SocketAddr::V4(SocketAddrV4::new(destination, 0)).into();
        log::debug!("Sending ICMP packet to {}: {} bytes", destination, packet.len());
        self.socket
            .send_to(packet, &target)
            .map_err(|e| TraceError::socket("send", e))
    }

    fn recv_from(&mut self, deadline: &Deadline) -> Result<(Vec<u8>, Ipv4Addr), TraceError> {
        loop {
            let remaining = deadline.remaining().ok_or(TraceError::Timeout {
                waited: deadline.budget(),
            })?;
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| TraceError::socket("set read deadline", e))?;

            let mut buffer = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];
            let (received, source) = match self.socket.recv_from(&mut buffer) {
                Ok(result) => result,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TraceError::Timeout {
                        waited: deadline.budget(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TraceError::socket("receive", e)),
            };

            // recv_from initialised the first `received` bytes.
            let datagram: Vec<u8> = buffer[..received]
                .iter()
                .map(|byte| unsafe { byte.assume_init() })
                .collect();

            let peer = match source.as_socket().map(|addr| addr.ip()) {
                Some(IpAddr::V4(ip)) => ip,
                _ => {
                    log::debug!("Ignoring datagram from non-IPv4 source");
                    continue;
                }
            };

            log::debug!("Received {} bytes from {}", received, peer);
            let icmp = strip_ipv4_header(&datagram)?;
            return Ok((icmp.to_vec(), peer));
        }
    }
}

/// Opens fresh raw sockets, optionally bound to a source address instead of
/// the wildcard address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSocketProvider {
    pub source: Option<Ipv4Addr>,
}

impl SocketProvider for RawSocketProvider {
    type Socket = IcmpSocket;

    fn open(&self) -> Result<IcmpSocket, TraceError> {
        let socket = IcmpSocket::new()?;
        if let Some(source) = self.source {
            socket.bind(source)?;
        }
        Ok(socket)
    }
}

/// Raw IPv4 sockets deliver the IP header along with the ICMP message.
pub fn strip_ipv4_header(datagram: &[u8]) -> Result<&[u8], TraceError> {
    let first = *datagram
        .first()
        .ok_or_else(|| TraceError::parse("empty datagram"))?;
    if first >> 4 != 4 {
        return Err(TraceError::parse(format!(
            "expected IPv4 header, got version {}",
            first >> 4
        )));
    }

    let header_len = ((first & 0x0f) as usize) * 4;
    if header_len < 20 || datagram.len() < header_len {
        return Err(TraceError::parse(format!(
            "truncated IPv4 header: {} of {} bytes",
            datagram.len(),
            header_len
        )));
    }
    Ok(&datagram[header_len..])
}
