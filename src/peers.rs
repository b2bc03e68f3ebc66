use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Renders the responders seen across one hop's attempts.
///
/// When every attempt was answered by the same address it is shown once,
/// otherwise all responders are listed in attempt order, duplicates
/// included. Each shown address is followed by its reverse names in
/// parentheses when `lookup` finds any; lookup failures are ignored.
///
/// ```text
/// [10.0.0.1 (gw.example.net)  10.0.0.2]
/// ```
pub fn summarize<L>(responders: &[Ipv4Addr], mut lookup: L) -> String
where
    L: FnMut(Ipv4Addr) -> anyhow::Result<Vec<String>>,
{
    let shown = if peers_identical(responders) {
        &responders[..responders.len().min(1)]
    } else {
        responders
    };

    let mut names: HashMap<Ipv4Addr, Vec<String>> = HashMap::new();
    let entries: Vec<String> = shown
        .iter()
        .map(|peer| {
            let resolved = names.entry(*peer).or_insert_with(|| match lookup(*peer) {
                Ok(found) => found,
                Err(e) => {
                    log::debug!("reverse lookup for {} failed: {}", peer, e);
                    Vec::new()
                }
            });
            if resolved.is_empty() {
                peer.to_string()
            } else {
                format!("{} ({})", peer, resolved.join(" "))
            }
        })
        .collect();

    format!("[{}]", entries.join("  "))
}

/// True when every attempt was answered by the same address.
pub fn peers_identical(responders: &[Ipv4Addr]) -> bool {
    responders.windows(2).all(|pair| pair[0] == pair[1])
}
