use std::process;

/// Generate a random identifier for this run's echo requests
pub fn generate_identifier() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=65535)
}

/// Fails early when raw ICMP sockets cannot be opened, instead of every hop
/// reporting the same socket error.
pub fn check_privileges_detailed() -> anyhow::Result<()> {
    match crate::icmp::socket::IcmpSocket::new() {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!(
            "{}\n\
            Raw ICMP sockets need elevated privileges:\n\
            1. run as root, or\n\
            2. grant the binary CAP_NET_RAW (setcap cap_net_raw+ep rutrace)",
            e
        )),
    }
}

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("rutrace: {}", message);
    process::exit(code);
}

/// Validate trace parameters
pub fn validate_trace_params(
    max_ttl: u32,
    attempts: u32,
    timeout_ms: u64,
    size: u32,
) -> anyhow::Result<()> {
    if max_ttl == 0 || max_ttl > 255 {
        return Err(anyhow::anyhow!("max TTL must be in the range 1-255"));
    }

    if attempts == 0 {
        return Err(anyhow::anyhow!("attempts per hop must be greater than 0"));
    }

    if timeout_ms == 0 {
        return Err(anyhow::anyhow!("timeout must be greater than 0"));
    }

    if size > 65500 {
        return Err(anyhow::anyhow!("packet size too large, maximum is 65500 bytes"));
    }

    Ok(())
}

/// Handle Ctrl+C signal for graceful shutdown
pub fn setup_signal_handler() -> tokio::sync::oneshot::Receiver<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => log::warn!("cannot listen for Ctrl+C: {}", e),
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_generation() {
        let ids: Vec<u16> = (0..8).map(|_| generate_identifier()).collect();
        assert!(ids.iter().all(|id| *id != 0));
        // Very unlikely to all be the same
        assert!(ids.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn test_parameter_validation() {
        // Valid parameters
        assert!(validate_trace_params(64, 3, 10_000, 56).is_ok());
        assert!(validate_trace_params(255, 1, 1, 0).is_ok());

        // Invalid TTL
        assert!(validate_trace_params(0, 3, 10_000, 56).is_err());
        assert!(validate_trace_params(256, 3, 10_000, 56).is_err());

        // Invalid attempts
        assert!(validate_trace_params(64, 0, 10_000, 56).is_err());

        // Invalid timeout
        assert!(validate_trace_params(64, 3, 0, 56).is_err());

        // Invalid size
        assert!(validate_trace_params(64, 3, 10_000, 70_000).is_err());
    }
}
