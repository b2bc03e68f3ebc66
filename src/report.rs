use std::io::Write;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::peers::summarize;
use crate::probe::HopStatus;
use crate::trace::{Hop, HopProber, TraceEnd, TraceRoute};

pub fn format_header(target: &str, destination: Ipv4Addr, max_ttl: u8) -> String {
    if target == destination.to_string() {
        format!("Tracing route to {} with MaxTTL = {}", target, max_ttl)
    } else {
        format!(
            "Tracing route to {} [{}] with MaxTTL = {}",
            target, destination, max_ttl
        )
    }
}

pub fn format_durations(durations: &[Duration]) -> String {
    let shown: Vec<String> = durations.iter().map(|d| format!("{:.3?}", d)).collect();
    format!("[{}]", shown.join(" "))
}

/// One output line for a probed hop.
pub fn format_hop<L>(hop: &Hop, lookup: L) -> String
where
    L: FnMut(Ipv4Addr) -> anyhow::Result<Vec<String>>,
{
    match &hop.result {
        Ok(outcome) => {
            let status = match outcome.status {
                HopStatus::Reached => "   Reached",
                HopStatus::TtlExceeded => " TTLExc at",
            };
            format!(
                "{:>3} {:>10} {} {}",
                hop.ttl,
                format_durations(&outcome.durations()),
                status,
                summarize(&outcome.responders(), lookup)
            )
        }
        Err(e) => format!("{:>3} ERROR: {}", hop.ttl, e),
    }
}

pub fn format_summary(end: TraceEnd, destination: Ipv4Addr) -> String {
    match end {
        TraceEnd::Reached { ttl } => format!(
            "Trace complete: reached {} in {} hop{}",
            destination,
            ttl,
            if ttl == 1 { "" } else { "s" }
        ),
        TraceEnd::Exhausted { max_ttl } => format!(
            "Destination {} not reached within {} hops",
            destination, max_ttl
        ),
        TraceEnd::Interrupted { after } => format!("Trace interrupted after {} hops", after),
    }
}

/// Drives the walk to completion, writing one line per hop as soon as it is
/// probed. `stop` is polled before each hop.
pub fn render_trace<P, L, W, S>(
    mut route: TraceRoute<P>,
    destination: Ipv4Addr,
    mut lookup: L,
    out: &mut W,
    mut stop: S,
) -> std::io::Result<TraceEnd>
where
    P: HopProber,
    L: FnMut(Ipv4Addr) -> anyhow::Result<Vec<String>>,
    W: Write,
    S: FnMut() -> bool,
{
    let end = loop {
        if let Some(end) = route.end() {
            break end;
        }
        if stop() {
            break TraceEnd::Interrupted {
                after: route.probed(),
            };
        }
        if let Some(hop) = route.next() {
            writeln!(out, "{}", format_hop(&hop, &mut lookup))?;
            out.flush()?;
        }
    };

    writeln!(out, "{}", format_summary(end, destination))?;
    Ok(end)
}
