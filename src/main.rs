mod cli;
mod dns;
mod error;
mod icmp;
mod peers;
mod probe;
mod report;
mod trace;
mod utils;

use icmp::RawSocketProvider;
use probe::Exchange;
use trace::TraceRoute;

#[tokio::main]
async fn main() {
    // Enable debug logging if RUST_LOG is set
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    // Parse command line arguments
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            utils::exit_with_error(&format!("invalid arguments: {}", e), 1);
        }
    };

    let target = args.target.clone();
    let config = match args.into_config(utils::generate_identifier()) {
        Ok(config) => config,
        Err(e) => {
            utils::exit_with_error(&e.to_string(), 1);
        }
    };

    // Resolve the destination once for the whole run
    let destination = match dns::resolve_hostname(&target).await {
        Ok(ip) => ip,
        Err(e) => {
            utils::exit_with_error(&e.to_string(), 1);
        }
    };

    if let Err(e) = utils::check_privileges_detailed() {
        utils::exit_with_error(&e.to_string(), 1);
    }

    log::info!(
        "tracing {} ({}) with identifier {:#06x}",
        target,
        destination,
        config.identifier
    );
    println!("{}", report::format_header(&target, destination, config.max_ttl));

    let mut shutdown_signal = utils::setup_signal_handler();

    // Probing blocks on the socket, so it runs off the async workers
    let traced = tokio::task::spawn_blocking(move || {
        let prober = Exchange::new(
            RawSocketProvider {
                source: config.source_address,
            },
            destination,
            config.identifier,
            config.payload_size,
            config.attempts,
            config.timeout,
        );
        let route = TraceRoute::new(prober, config.max_ttl);
        let numeric = config.numeric;
        let lookup = move |peer| {
            if numeric {
                Ok(Vec::new())
            } else {
                dns::reverse_names(peer)
            }
        };

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        report::render_trace(route, destination, lookup, &mut out, || {
            shutdown_signal.try_recv().is_ok()
        })
    })
    .await;

    match traced {
        Ok(Ok(end)) => log::info!("trace finished: {:?}", end),
        Ok(Err(e)) => utils::exit_with_error(&format!("cannot write output: {}", e), 1),
        Err(e) => utils::exit_with_error(&format!("trace task failed: {}", e), 1),
    }
}
