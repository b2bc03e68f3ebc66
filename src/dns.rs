use dns_lookup::{lookup_addr, lookup_host};
use std::net::{IpAddr, Ipv4Addr};

use crate::error::TraceError;

/// Resolves a hostname or IPv4 literal to the address every hop is probed
/// against. Only IPv4 destinations can be traced.
pub async fn resolve_hostname(hostname: &str) -> Result<Ipv4Addr, TraceError> {
    let failed = |reason: String| TraceError::AddressResolution {
        target: hostname.to_string(),
        reason,
    };

    // First try to parse as IP address
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(_) => Err(failed("IPv6 destinations are not supported".to_string())),
        };
    }

    // Dotted digits that did not parse are a bad literal, not a hostname
    let numeric = hostname.chars().all(|c| c.is_ascii_digit() || c == '.');
    if hostname.trim().is_empty() || numeric {
        return Err(failed("not a valid IPv4 address or hostname".to_string()));
    }

    let addresses = tokio::task::spawn_blocking({
        let hostname = hostname.to_string();
        move || lookup_host(&hostname)
    })
    .await
    .map_err(|e| failed(e.to_string()))?
    .map_err(|e| failed(e.to_string()))?;

    addresses
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| failed("no IPv4 address found".to_string()))
}

/// Reverse names for an address. The system resolver hands back the
/// numeric address itself when there is no PTR record; that is dropped.
pub fn reverse_names(ip: Ipv4Addr) -> anyhow::Result<Vec<String>> {
    let numeric = ip.to_string();
    let name = lookup_addr(&IpAddr::V4(ip))?;
    let name = name.trim_end_matches('.');

    if name.is_empty() || name == numeric {
        Ok(Vec::new())
    } else {
        Ok(vec![name.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_address_parsing() {
        let result = resolve_hostname("8.8.8.8").await;
        assert_eq!(result.unwrap(), Ipv4Addr::new(8, 8, 8, 8));
    }

    #[tokio::test]
    async fn test_ipv6_literal_rejected() {
        let err = resolve_hostname("::1").await.unwrap_err();
        assert!(matches!(err, TraceError::AddressResolution { .. }));
        assert!(err.to_string().contains("'::1'"));
    }

    #[tokio::test]
    async fn test_malformed_literal_rejected() {
        for target in ["300.1.1.1", "1.2.3", "", "  "] {
            let err = resolve_hostname(target).await.unwrap_err();
            assert!(matches!(err, TraceError::AddressResolution { .. }), "{:?}", target);
        }
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        // May resolve to ::1 only on some hosts
        match resolve_hostname("localhost").await {
            Ok(ip) => assert!(ip.is_loopback()),
            Err(e) => println!("localhost resolution failed: {}", e),
        }
    }

    #[test]
    fn test_reverse_lookup() {
        let result = reverse_names(Ipv4Addr::new(8, 8, 8, 8));
        // This may or may not succeed depending on DNS configuration
        println!("Reverse lookup result: {:?}", result);
        if let Ok(names) = result {
            assert!(!names.contains(&"8.8.8.8".to_string()));
        }
    }
}
