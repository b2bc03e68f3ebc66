//! One hop's measurement: a fixed number of echo probes sent with the same
//! TTL over a freshly opened socket, all sharing a single read deadline.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::error::TraceError;
use crate::icmp::{ICMP_ECHO_REQUEST, IcmpPacket, Origin, ReplyKind};
use crate::trace::HopProber;

/// A point in time after which no more replies are awaited for a hop.
///
/// Created once per hop and shared by every attempt, so a slow first
/// attempt leaves less time for the ones after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Time left, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// The operations a hop exchange needs from a raw ICMP endpoint.
pub trait ProbeSocket {
    fn set_ttl(&mut self, ttl: u8) -> Result<(), TraceError>;

    /// Returns the number of bytes actually written.
    fn send_to(&mut self, packet: &[u8], destination: Ipv4Addr) -> Result<usize, TraceError>;

    /// Blocks until a datagram arrives or `deadline` passes. Returns the ICMP
    /// message (no IP header) and the address it came from.
    fn recv_from(&mut self, deadline: &Deadline) -> Result<(Vec<u8>, Ipv4Addr), TraceError>;
}

pub trait SocketProvider {
    type Socket: ProbeSocket;

    fn open(&self) -> Result<Self::Socket, TraceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub rtt: Duration,
    pub responder: Ipv4Addr,
    pub kind: ReplyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopStatus {
    Reached,
    TtlExceeded,
}

/// Everything one hop's attempts produced, in attempt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ttl: u8,
    pub attempts: Vec<ProbeAttempt>,
    pub status: HopStatus,
}

impl ProbeOutcome {
    pub fn responders(&self) -> Vec<Ipv4Addr> {
        self.attempts.iter().map(|a| a.responder).collect()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.attempts.iter().map(|a| a.rtt).collect()
    }
}

/// Reduces a hop's attempts to its status. Any echo reply means the
/// destination was reached; otherwise any time-exceeded means an
/// intermediate hop. Attempts that were all some other ICMP type are an
/// error naming the last of them.
pub fn aggregate(attempts: &[ProbeAttempt]) -> Result<HopStatus, TraceError> {
    let status = attempts.iter().fold(None, |status, attempt| match (status, attempt.kind) {
        (Some(HopStatus::Reached), _) | (_, ReplyKind::EchoReply) => Some(HopStatus::Reached),
        (_, ReplyKind::TimeExceeded) => Some(HopStatus::TtlExceeded),
        (status, ReplyKind::Other { .. }) => status,
    });

    match (status, attempts.last()) {
        (Some(status), _) => Ok(status),
        (
            None,
            Some(ProbeAttempt {
                responder,
                kind: ReplyKind::Other { icmp_type, code },
                ..
            }),
        ) => Err(TraceError::UnexpectedIcmpType {
            icmp_type: *icmp_type,
            code: *code,
            peer: *responder,
        }),
        (None, _) => Ok(HopStatus::TtlExceeded),
    }
}

/// Runs `attempts` send/receive cycles of `request` at `ttl` against
/// `destination`.
///
/// The first send, receive or decode failure aborts the hop. The socket is
/// dropped on every return path.
pub fn exchange<P: SocketProvider>(
    provider: &P,
    destination: Ipv4Addr,
    request: &IcmpPacket,
    ttl: u8,
    attempts: usize,
    timeout: Duration,
) -> Result<ProbeOutcome, TraceError> {
    let mut socket = provider.open()?;
    socket.set_ttl(ttl)?;

    let packet = request.to_bytes();
    let deadline = Deadline::after(timeout);
    let mut collected = Vec::with_capacity(attempts);

    for attempt in 1..=attempts {
        let start = Instant::now();
        let sent = socket.send_to(&packet, destination)?;
        if sent != packet.len() {
            return Err(TraceError::TransmissionSize {
                sent,
                expected: packet.len(),
            });
        }

        let (reply, responder) = receive_reply(&mut socket, &deadline, request)?;
        let rtt = start.elapsed();
        let kind = ReplyKind::classify(reply.icmp_type, reply.code);
        log::debug!(
            "ttl {} attempt {}: {:?} from {} in {:?}",
            ttl,
            attempt,
            kind,
            responder,
            rtt
        );

        collected.push(ProbeAttempt {
            rtt,
            responder,
            kind,
        });
    }

    let status = aggregate(&collected)?;
    Ok(ProbeOutcome {
        ttl,
        attempts: collected,
        status,
    })
}

/// Waits for the next message that can answer `request`. Looped-back echo
/// requests, messages quoting other traffic, and echoes of another session
/// or an earlier hop are skipped; the wait continues under the same
/// deadline.
fn receive_reply<S: ProbeSocket>(
    socket: &mut S,
    deadline: &Deadline,
    request: &IcmpPacket,
) -> Result<(IcmpPacket, Ipv4Addr), TraceError> {
    loop {
        let (bytes, responder) = socket.recv_from(deadline)?;
        let reply = IcmpPacket::from_bytes(&bytes)?;
        if !reply.verify_checksum() {
            log::debug!("Bad ICMP checksum from {}", responder);
        }

        if reply.icmp_type == ICMP_ECHO_REQUEST {
            log::debug!("Ignoring echo request from {}", responder);
            continue;
        }
        match reply.origin() {
            Origin::Echo {
                identifier,
                sequence,
            } if identifier == request.identifier && sequence == request.sequence => {
                return Ok((reply, responder));
            }
            Origin::Unknown => return Ok((reply, responder)),
            Origin::Echo {
                identifier,
                sequence,
            } => {
                log::debug!(
                    "Ignoring ICMP type {} from {} for echo {:#06x}/{}",
                    reply.icmp_type,
                    responder,
                    identifier,
                    sequence
                );
            }
            Origin::Foreign => {
                log::debug!(
                    "Ignoring ICMP type {} from {} quoting other traffic",
                    reply.icmp_type,
                    responder
                );
            }
        }
    }
}

/// Probes hops with [`exchange`]. Each hop's echo request carries the TTL
/// as its sequence number so late replies to an earlier hop are not
/// mistaken for this one's.
pub struct Exchange<P> {
    provider: P,
    destination: Ipv4Addr,
    identifier: u16,
    payload_size: usize,
    attempts: usize,
    timeout: Duration,
}

impl<P: SocketProvider> Exchange<P> {
    pub fn new(
        provider: P,
        destination: Ipv4Addr,
        identifier: u16,
        payload_size: usize,
        attempts: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            destination,
            identifier,
            payload_size,
            attempts,
            timeout,
        }
    }
}

impl<P: SocketProvider> HopProber for Exchange<P> {
    fn probe(&mut self, ttl: u8) -> Result<ProbeOutcome, TraceError> {
        let request = IcmpPacket::new_echo_request(self.identifier, ttl as u16, self.payload_size);
        exchange(
            &self.provider,
            self.destination,
            &request,
            ttl,
            self.attempts,
            self.timeout,
        )
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::icmp::ICMP_DEST_UNREACHABLE;
    use crate::trace::{TraceEnd, TraceRoute};
    use std::rc::Rc;

    const DEST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    fn run_with(
        provider: &FakeProvider,
        ttl: u8,
        attempts: usize,
        timeout: Duration,
    ) -> Result<ProbeOutcome, TraceError> {
        let request = IcmpPacket::new_echo_request(ID, ttl as u16, 56);
        exchange(provider, DEST, &request, ttl, attempts, timeout)
    }

    fn run(provider: &FakeProvider, ttl: u8, attempts: usize) -> Result<ProbeOutcome, TraceError> {
        run_with(provider, ttl, attempts, Duration::from_secs(1))
    }

    fn attempt(kind: ReplyKind) -> ProbeAttempt {
        ProbeAttempt {
            rtt: Duration::from_millis(1),
            responder: Ipv4Addr::new(10, 0, 0, 1),
            kind,
        }
    }

    #[test]
    fn test_aggregate_any_echo_reply_wins() {
        let other = ReplyKind::Other { icmp_type: 3, code: 1 };
        let cases = [
            vec![ReplyKind::EchoReply],
            vec![ReplyKind::TimeExceeded, ReplyKind::TimeExceeded, ReplyKind::EchoReply],
            vec![ReplyKind::EchoReply, ReplyKind::TimeExceeded],
            vec![other, ReplyKind::EchoReply, other],
        ];
        for kinds in cases {
            let attempts: Vec<_> = kinds.into_iter().map(attempt).collect();
            assert_eq!(aggregate(&attempts).unwrap(), HopStatus::Reached);
        }
    }

    #[test]
    fn test_aggregate_without_echo_reply_is_ttl_exceeded() {
        let other = ReplyKind::Other { icmp_type: 3, code: 1 };
        let attempts: Vec<_> = [ReplyKind::TimeExceeded, other, ReplyKind::TimeExceeded]
            .into_iter()
            .map(attempt)
            .collect();
        assert_eq!(aggregate(&attempts).unwrap(), HopStatus::TtlExceeded);
    }

    #[test]
    fn test_aggregate_all_other_names_last_type() {
        let attempts = vec![
            attempt(ReplyKind::Other { icmp_type: 3, code: 1 }),
            attempt(ReplyKind::Other { icmp_type: 12, code: 0 }),
        ];
        match aggregate(&attempts) {
            Err(TraceError::UnexpectedIcmpType { icmp_type, code, .. }) => {
                assert_eq!((icmp_type, code), (12, 0));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.remaining().is_none());
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.remaining().is_some());
    }

    #[test]
    fn test_exchange_intermediate_hop() {
        let provider = FakeProvider::scripted(vec![
            time_exceeded(ID, 3, [10, 0, 0, 1]),
            time_exceeded(ID, 3, [10, 0, 0, 1]),
            time_exceeded(ID, 3, [10, 0, 0, 2]),
        ]);
        let outcome = run(&provider, 3, 3).unwrap();

        assert_eq!(outcome.ttl, 3);
        assert_eq!(outcome.status, HopStatus::TtlExceeded);
        assert_eq!(
            outcome.responders(),
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2)
            ]
        );
        let log = provider.log.borrow();
        assert_eq!(log.ttls, vec![3]);
        assert_eq!(log.sends, 3);
        assert_eq!((log.opened, log.dropped), (1, 1));
    }

    #[test]
    fn test_exchange_keeps_sending_after_echo_reply() {
        let provider = FakeProvider::scripted(vec![
            echo_reply(ID, 7, [192, 0, 2, 1]),
            time_exceeded(ID, 7, [10, 0, 0, 9]),
            echo_reply(ID, 7, [192, 0, 2, 1]),
        ]);
        let outcome = run(&provider, 7, 3).unwrap();

        assert_eq!(outcome.status, HopStatus::Reached);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.attempts[1].kind, ReplyKind::TimeExceeded);
        assert_eq!(provider.log.borrow().sends, 3);
    }

    #[test]
    fn test_exchange_timeout_aborts_hop_and_closes_socket() {
        let provider =
            FakeProvider::scripted(vec![time_exceeded(ID, 2, [10, 0, 0, 1]), Scripted::Timeout]);
        let err = run(&provider, 2, 3).unwrap_err();

        assert!(matches!(err, TraceError::Timeout { .. }));
        let log = provider.log.borrow();
        assert_eq!(log.sends, 2);
        assert_eq!(log.dropped, 1);
    }

    #[test]
    fn test_exchange_attempts_share_one_deadline() {
        let provider = FakeProvider::scripted(vec![
            time_exceeded(ID, 4, [10, 0, 0, 1]),
            time_exceeded(ID, 4, [10, 0, 0, 1]),
            time_exceeded(ID, 4, [10, 0, 0, 1]),
        ]);
        run_with(&provider, 4, 3, Duration::from_secs(5)).unwrap();

        let log = provider.log.borrow();
        assert_eq!(log.deadlines.len(), 3);
        assert!(log.deadlines.iter().all(|d| *d == log.deadlines[0]));
        assert_eq!(log.deadlines[0].budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_slow_first_attempt_starves_the_next() {
        // Each reply alone fits the budget, together they do not.
        let provider = FakeProvider::scripted(vec![
            Scripted::Delayed(
                Duration::from_millis(140),
                Box::new(time_exceeded(ID, 1, [10, 0, 0, 1])),
            ),
            Scripted::Delayed(
                Duration::from_millis(100),
                Box::new(time_exceeded(ID, 1, [10, 0, 0, 1])),
            ),
        ]);
        let err = run_with(&provider, 1, 2, Duration::from_millis(200)).unwrap_err();

        assert!(matches!(err, TraceError::Timeout { .. }));
        let log = provider.log.borrow();
        assert_eq!(log.sends, 2);
        assert_eq!(log.deadlines.len(), 2);
        assert_eq!(log.deadlines[0], log.deadlines[1]);
    }

    #[test]
    fn test_exchange_short_write() {
        let provider = FakeProvider::scripted(vec![Scripted::Short]);
        let err = run(&provider, 1, 3).unwrap_err();

        assert!(matches!(
            err,
            TraceError::TransmissionSize { expected: 64, sent: 32 }
        ));
        assert_eq!(provider.log.borrow().sends, 1);
        assert_eq!(provider.log.borrow().dropped, 1);
    }

    #[test]
    fn test_exchange_malformed_reply() {
        let provider = FakeProvider::scripted(vec![Scripted::Reply(
            vec![11, 0, 0],
            Ipv4Addr::new(10, 0, 0, 1),
        )]);
        let err = run(&provider, 1, 3).unwrap_err();
        assert!(matches!(err, TraceError::ProtocolParse { .. }));
        assert_eq!(provider.log.borrow().dropped, 1);
    }

    #[test]
    fn test_exchange_socket_refused() {
        let provider = FakeProvider {
            refuse: true,
            ..Default::default()
        };
        let err = run(&provider, 1, 3).unwrap_err();
        assert!(matches!(err, TraceError::Socket { .. }));
    }

    #[test]
    fn test_exchange_other_types_do_not_abort() {
        let provider = FakeProvider::scripted(vec![
            icmp_error(ICMP_DEST_UNREACHABLE, ID, 4, [10, 0, 0, 1]),
            time_exceeded(ID, 4, [10, 0, 0, 1]),
        ]);
        let outcome = run(&provider, 4, 2).unwrap();
        assert_eq!(outcome.status, HopStatus::TtlExceeded);
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[test]
    fn test_exchange_all_other_is_error() {
        let provider = FakeProvider::scripted(vec![
            icmp_error(ICMP_DEST_UNREACHABLE, ID, 4, [10, 0, 0, 1]),
            icmp_error(ICMP_DEST_UNREACHABLE, ID, 4, [10, 0, 0, 1]),
        ]);
        let err = run(&provider, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            TraceError::UnexpectedIcmpType { icmp_type: 3, .. }
        ));
    }

    #[test]
    fn test_exchange_skips_foreign_replies() {
        let provider = FakeProvider::scripted(vec![
            echo_reply(ID ^ 0xffff, 5, [198, 51, 100, 7]),
            time_exceeded(ID ^ 0xffff, 5, [10, 9, 9, 9]),
            echo_reply(ID, 5, [192, 0, 2, 1]),
        ]);
        let outcome = run(&provider, 5, 1).unwrap();
        assert_eq!(outcome.status, HopStatus::Reached);
        assert_eq!(outcome.responders(), vec![Ipv4Addr::new(192, 0, 2, 1)]);
    }

    #[test]
    fn test_exchange_skips_errors_quoting_other_traffic() {
        let mut timestamp = IcmpPacket::new_echo_request(ID, 5, 0);
        timestamp.icmp_type = 13;
        let provider = FakeProvider::scripted(vec![
            udp_time_exceeded([203, 0, 113, 9]),
            time_exceeded_quoting(&timestamp, [203, 0, 113, 10]),
            echo_reply(ID, 5, [192, 0, 2, 1]),
        ]);
        let outcome = run(&provider, 5, 1).unwrap();
        assert_eq!(outcome.status, HopStatus::Reached);
        assert_eq!(outcome.responders(), vec![Ipv4Addr::new(192, 0, 2, 1)]);
    }

    fn time_exceeded_quoting(inner: &IcmpPacket, from: [u8; 4]) -> Scripted {
        let mut quoted = vec![0u8; 20];
        quoted[0] = 0x45;
        quoted[9] = 1;
        quoted.extend_from_slice(&inner.to_bytes());
        let message = IcmpPacket {
            icmp_type: 11,
            code: 0,
            checksum: 0,
            identifier: 0,
            sequence: 0,
            payload: quoted,
        };
        Scripted::Reply(message.to_bytes(), Ipv4Addr::from(from))
    }

    #[test]
    fn test_exchange_skips_late_reply_from_earlier_hop() {
        let provider = FakeProvider::scripted(vec![
            time_exceeded(ID, 5, [10, 0, 0, 5]),
            echo_reply(ID, 5, [192, 0, 2, 1]),
            time_exceeded(ID, 6, [10, 0, 0, 6]),
        ]);
        let outcome = run(&provider, 6, 1).unwrap();
        assert_eq!(outcome.status, HopStatus::TtlExceeded);
        assert_eq!(outcome.responders(), vec![Ipv4Addr::new(10, 0, 0, 6)]);
    }

    #[test]
    fn test_exchange_skips_looped_back_request() {
        let request = IcmpPacket::new_echo_request(ID, 1, 56).to_bytes();
        let provider = FakeProvider::scripted(vec![
            Scripted::Reply(request, Ipv4Addr::LOCALHOST),
            echo_reply(ID, 1, [127, 0, 0, 1]),
        ]);
        let outcome = run(&provider, 1, 1).unwrap();
        assert_eq!(outcome.status, HopStatus::Reached);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[test]
    fn test_each_hop_sends_its_ttl_as_sequence() {
        let provider = FakeProvider::scripted(vec![
            time_exceeded(ID, 1, [10, 0, 0, 1]),
            echo_reply(ID, 2, [192, 0, 2, 1]),
        ]);
        let log = Rc::clone(&provider.log);
        let hops = Exchange::new(provider, DEST, ID, 56, 1, Duration::from_secs(1));
        let mut route = TraceRoute::new(hops, 5);

        let statuses: Vec<_> = route
            .by_ref()
            .map(|hop| hop.result.unwrap().status)
            .collect();
        assert_eq!(statuses, vec![HopStatus::TtlExceeded, HopStatus::Reached]);
        assert_eq!(route.end(), Some(TraceEnd::Reached { ttl: 2 }));
        assert_eq!(log.borrow().ttls, vec![1, 2]);
        assert_eq!(log.borrow().dropped, 2);
    }
}
