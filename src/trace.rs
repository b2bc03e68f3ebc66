//! TTL escalation: probe hop 1, 2, ... until the destination answers or the
//! ceiling is hit.

use crate::error::TraceError;
use crate::probe::{HopStatus, ProbeOutcome};

/// Measures a single hop at the given TTL.
pub trait HopProber {
    fn probe(&mut self, ttl: u8) -> Result<ProbeOutcome, TraceError>;
}

impl<F> HopProber for F
where
    F: FnMut(u8) -> Result<ProbeOutcome, TraceError>,
{
    fn probe(&mut self, ttl: u8) -> Result<ProbeOutcome, TraceError> {
        self(ttl)
    }
}

#[derive(Debug)]
pub struct Hop {
    pub ttl: u8,
    pub result: Result<ProbeOutcome, TraceError>,
}

impl Hop {
    pub fn reached(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.status == HopStatus::Reached)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEnd {
    Reached { ttl: u8 },
    Exhausted { max_ttl: u8 },
    Interrupted { after: u8 },
}

/// Lazily probes increasing TTLs, one hop per `next()`.
///
/// A failed hop is yielded as an error and the walk continues with the next
/// TTL. Iteration stops after the first hop that reaches the destination or
/// after `max_ttl`.
pub struct TraceRoute<P> {
    prober: P,
    next_ttl: u16,
    max_ttl: u8,
    reached: Option<u8>,
}

impl<P: HopProber> TraceRoute<P> {
    pub fn new(prober: P, max_ttl: u8) -> Self {
        Self {
            prober,
            next_ttl: 1,
            max_ttl,
            reached: None,
        }
    }

    /// How the walk ended, once it has.
    pub fn end(&self) -> Option<TraceEnd> {
        match self.reached {
            Some(ttl) => Some(TraceEnd::Reached { ttl }),
            None if self.next_ttl > self.max_ttl as u16 => Some(TraceEnd::Exhausted {
                max_ttl: self.max_ttl,
            }),
            None => None,
        }
    }

    pub fn probed(&self) -> u8 {
        (self.next_ttl - 1) as u8
    }
}

impl<P: HopProber> Iterator for TraceRoute<P> {
    type Item = Hop;

    fn next(&mut self) -> Option<Hop> {
        if self.end().is_some() {
            return None;
        }

        let ttl = self.next_ttl as u8;
        self.next_ttl += 1;

        let result = self.prober.probe(ttl);
        if let Err(e) = &result {
            log::warn!("hop {} failed: {}", ttl, e);
        }

        let hop = Hop { ttl, result };
        if hop.reached() {
            self.reached = Some(ttl);
        }
        Some(hop)
    }
}
