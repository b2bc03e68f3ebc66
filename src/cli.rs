use clap::{Arg, ArgAction, Command};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_MAX_TTL: u32 = 64;
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct TraceArgs {
    pub target: String,
    pub max_ttl: u32,
    pub attempts: u32,
    pub timeout_ms: u64,
    pub size: u32,
    pub numeric: bool,
    pub source_address: Option<Ipv4Addr>,
}

impl Default for TraceArgs {
    fn default() -> Self {
        Self {
            target: String::new(),
            max_ttl: DEFAULT_MAX_TTL,
            attempts: DEFAULT_ATTEMPTS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            size: crate::icmp::DEFAULT_PAYLOAD_SIZE as u32,
            numeric: false,
            source_address: None,
        }
    }
}

/// Run-scoped settings shared by every hop.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_ttl: u8,
    pub attempts: usize,
    pub timeout: Duration,
    pub payload_size: usize,
    pub identifier: u16,
    pub numeric: bool,
    pub source_address: Option<Ipv4Addr>,
}

impl TraceArgs {
    /// Validates the arguments and fixes the echo identifier for this run.
    pub fn into_config(self, identifier: u16) -> anyhow::Result<TraceConfig> {
        crate::utils::validate_trace_params(self.max_ttl, self.attempts, self.timeout_ms, self.size)?;

        Ok(TraceConfig {
            max_ttl: u8::try_from(self.max_ttl)?,
            attempts: self.attempts as usize,
            timeout: Duration::from_millis(self.timeout_ms),
            payload_size: self.size as usize,
            identifier,
            numeric: self.numeric,
            source_address: self.source_address,
        })
    }
}

pub fn build_cli() -> Command {
    Command::new("rutrace")
        .version("0.1.0")
        .about("Trace the route to a host with ICMP echo requests")
        .arg(
            Arg::new("target")
                .help("Target hostname or IPv4 address")
                .required(true)
                .index(1)
        )
        .arg(
            Arg::new("max_ttl")
                .short('m')
                .help("Maximum number of hops to probe")
                .value_name("max_ttl")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("attempts")
                .short('q')
                .help("Number of echo requests sent per hop")
                .value_name("nqueries")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("timeout")
                .short('w')
                .help("Timeout in milliseconds to wait for all replies of one hop")
                .value_name("timeout")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("size")
                .short('l')
                .help("Echo payload size in bytes")
                .value_name("size")
                .value_parser(clap::value_parser!(u32))
        )
        .arg(
            Arg::new("numeric")
                .short('n')
                .help("Do not resolve hop addresses to hostnames")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("source_address")
                .short('S')
                .help("Source address to use")
                .value_name("srcaddr")
                .value_parser(clap::value_parser!(Ipv4Addr))
        )
}

pub fn parse_args() -> anyhow::Result<TraceArgs> {
    args_from(build_cli().get_matches())
}

fn args_from(matches: clap::ArgMatches) -> anyhow::Result<TraceArgs> {
    let mut args = TraceArgs::default();

    args.target = matches
        .get_one::<String>("target")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing target"))?;
    args.numeric = matches.get_flag("numeric");

    if let Some(max_ttl) = matches.get_one::<u32>("max_ttl") {
        args.max_ttl = *max_ttl;
    }

    if let Some(attempts) = matches.get_one::<u32>("attempts") {
        args.attempts = *attempts;
    }

    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        args.timeout_ms = *timeout;
    }

    if let Some(size) = matches.get_one::<u32>("size") {
        args.size = *size;
    }

    if let Some(source_address) = matches.get_one::<Ipv4Addr>("source_address") {
        args.source_address = Some(*source_address);
    }

    Ok(args)
}
