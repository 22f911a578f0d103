//! Name-server discovery and `host:port` normalization.

use std::net::{IpAddr, SocketAddr};

use tracing::debug;

use super::DnsError;

pub const DNS_PORT: u16 = 53;

/// Parse a user-supplied server, defaulting the port to 53.
///
/// Accepts `1.1.1.1`, `1.1.1.1:5353`, `2606:4700::1111`, `[2606:4700::1111]`
/// and `[2606:4700::1111]:53`.
pub fn parse_server(input: &str) -> Result<SocketAddr, DnsError> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let bare = input
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(input);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }
    Err(DnsError::InvalidInput(format!(
        "name server must be an IP address with optional port, got {:?}",
        input
    )))
}

/// Canonical string form of a server, as stored in settings.
pub fn normalize_server(input: &str) -> Result<String, DnsError> {
    parse_server(input).map(|addr| addr.to_string())
}

/// Name servers the host is configured with, in preference order.
pub fn system_name_servers() -> Vec<SocketAddr> {
    let from_resolv = std::fs::read_to_string("/etc/resolv.conf")
        .map(|content| parse_resolv_conf(&content))
        .unwrap_or_default();
    if !from_resolv.is_empty() {
        debug!(count = from_resolv.len(), "using name servers from /etc/resolv.conf");
        return from_resolv;
    }

    let from_env = std::env::var("DNS_SERVERS")
        .map(|v| parse_server_list(&v))
        .unwrap_or_default();
    if !from_env.is_empty() {
        debug!(count = from_env.len(), "using name servers from DNS_SERVERS");
    }
    from_env
}

pub fn parse_resolv_conf(content: &str) -> Vec<SocketAddr> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => {
                    // Scoped link-local entries ("fe80::1%eth0") are skipped.
                    addr.parse::<IpAddr>()
                        .ok()
                        .map(|ip| SocketAddr::new(ip, DNS_PORT))
                }
                _ => None,
            }
        })
        .collect()
}

pub fn parse_server_list(list: &str) -> Vec<SocketAddr> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| parse_server(s).ok())
        .collect()
}

/// Zones the resolver library answers itself (RFC 6761 `localhost` and
/// `invalid`, plus the loopback reverse zones), so no server is asked.
const SPECIAL_USE_ZONES: &[&str] = &[
    "localhost",
    "invalid",
    "127.in-addr.arpa",
    "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.ip6.arpa",
];

/// Whether `name` is, or lies under, a special-use zone.
pub fn is_special_use(name: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    SPECIAL_USE_ZONES.iter().any(|zone| {
        name == *zone
            || name
                .strip_suffix(zone)
                .map_or(false, |head| head.ends_with('.'))
    })
}
