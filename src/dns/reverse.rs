//! Reverse-lookup (PTR) name handling.

use std::fmt::Write as _;
use std::net::IpAddr;

use super::DnsError;

/// Name to query for a PTR lookup of `input`.
///
/// IP literals are rewritten into their `in-addr.arpa` / `ip6.arpa` form;
/// anything else must already be a well-formed reverse domain.
pub fn ptr_query_name(input: &str) -> Result<String, DnsError> {
    let input = input.trim();
    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(reverse_name(ip));
    }
    if is_reverse_domain(input) {
        return Ok(input.trim_end_matches('.').to_string());
    }
    Err(DnsError::InvalidInput(format!(
        "PTR lookup needs an IP address or reverse domain, got {:?}",
        input
    )))
}

pub fn reverse_name(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", d, c, b, a)
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(72);
            for byte in v6.octets().iter().rev() {
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

pub fn is_reverse_domain(name: &str) -> bool {
    let lower = name.trim_end_matches('.').to_ascii_lowercase();

    if let Some(prefix) = lower.strip_suffix(".in-addr.arpa") {
        let labels: Vec<&str> = prefix.split('.').collect();
        return (1..=4).contains(&labels.len())
            && labels
                .iter()
                .all(|l| !l.is_empty() && l.len() <= 3 && l.parse::<u8>().is_ok());
    }

    if let Some(prefix) = lower.strip_suffix(".ip6.arpa") {
        let labels: Vec<&str> = prefix.split('.').collect();
        return (1..=32).contains(&labels.len())
            && labels
                .iter()
                .all(|l| l.len() == 1 && l.chars().all(|c| c.is_ascii_hexdigit()));
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_rewrite() {
        assert_eq!(
            ptr_query_name("192.0.2.1").unwrap(),
            "1.2.0.192.in-addr.arpa"
        );
    }

    #[test]
    fn test_ipv6_rewrite() {
        let name = ptr_query_name("2001:db8::1").unwrap();
        assert_eq!(
            name,
            "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"
        );
    }

    #[test]
    fn test_reverse_domain_passes_through() {
        assert_eq!(
            ptr_query_name("1.2.0.192.in-addr.arpa.").unwrap(),
            "1.2.0.192.in-addr.arpa"
        );
        assert!(is_reverse_domain("2.0.192.IN-ADDR.ARPA"));
        assert!(is_reverse_domain("8.b.d.0.1.0.0.2.ip6.arpa"));
    }

    #[test]
    fn test_malformed_names_are_rejected() {
        assert!(matches!(ptr_query_name("hello"), Err(DnsError::InvalidInput(_))));
        assert!(!is_reverse_domain("300.2.0.192.in-addr.arpa"));
        assert!(!is_reverse_domain("in-addr.arpa"));
        assert!(!is_reverse_domain("ab.ip6.arpa"));
        assert!(!is_reverse_domain("1.2.3.4.5.in-addr.arpa"));
    }
}
