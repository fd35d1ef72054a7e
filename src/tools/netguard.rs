//! Network egress guard for HTTP tools.
//!
//! Rejects URLs that point at private, loopback or link-local address space
//! before any connection is dialled, closing the SSRF hole where an agent is
//! talked into probing internal services. Also provides header redaction for
//! logs and stored tool output.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Blocked hostnames regardless of resolution.
const BLOCKED_HOSTS: &[&str] = &["localhost", "0.0.0.0", "::1"];

/// Header names whose values must never appear in logs or stored output.
pub const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EgressViolation {
    #[error("URL is not valid: {0}")]
    InvalidUrl(String),

    #[error("scheme '{0}' is not allowed; only http and https")]
    SchemeNotAllowed(String),

    #[error("host '{0}' is in a blocked address range")]
    BlockedAddress(String),
}

/// Validate an outbound URL. Returns the parsed URL when allowed.
pub fn check_url(raw: &str) -> Result<Url, EgressViolation> {
    let url = Url::parse(raw).map_err(|e| EgressViolation::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(EgressViolation::SchemeNotAllowed(other.to_owned())),
    }

    match url.host() {
        None => return Err(EgressViolation::InvalidUrl("missing host".to_owned())),
        Some(Host::Domain(domain)) => {
            let lower = domain.to_lowercase();
            if BLOCKED_HOSTS.contains(&lower.as_str()) {
                return Err(EgressViolation::BlockedAddress(lower));
            }
            // Bracketless IPv6 and dotted IPv4 sometimes parse as domains.
            if let Ok(ip) = lower.parse::<IpAddr>()
                && is_blocked_ip(ip)
            {
                return Err(EgressViolation::BlockedAddress(lower));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_blocked_ipv4(ip) {
                return Err(EgressViolation::BlockedAddress(ip.to_string()));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_blocked_ipv6(ip) {
                return Err(EgressViolation::BlockedAddress(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

/// 10/8, 127/8, 169.254/16, 172.16/12, 192.168/16, 0/8.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    match octets[0] {
        0 | 10 | 127 => true,
        169 => octets[1] == 254,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        _ => false,
    }
}

/// fc00::/7, fe80::/10, loopback, unspecified, and v4-mapped blocked ranges.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let segments = ip.segments();
    // fc00::/7
    if segments[0] & 0xfe00 == 0xfc00 {
        return true;
    }
    // fe80::/10
    if segments[0] & 0xffc0 == 0xfe80 {
        return true;
    }
    false
}

/// Replace the value of any sensitive header in a `(name, value)` list.
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if REDACTED_HEADERS.contains(&name.to_lowercase().as_str()) {
                (name.clone(), "[redacted]".to_owned())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_urls_are_allowed() {
        assert!(check_url("https://example.com/api").is_ok());
        assert!(check_url("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn non_http_schemes_are_refused() {
        assert!(matches!(
            check_url("ftp://example.com/file"),
            Err(EgressViolation::SchemeNotAllowed(_))
        ));
        assert!(matches!(
            check_url("file:///etc/passwd"),
            Err(EgressViolation::SchemeNotAllowed(_))
        ));
    }

    #[test]
    fn every_documented_blocked_host_is_refused() {
        let blocked = [
            "http://10.0.0.1/",
            "http://10.255.255.255/admin",
            "http://127.0.0.1:8080/",
            "http://127.1.2.3/",
            "http://169.254.169.254/latest/meta-data",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "http://192.168.1.1/",
            "http://0.0.0.0/",
            "http://0.1.2.3/",
            "http://localhost/",
            "http://LOCALHOST:3000/",
            "http://[::1]/",
            "http://[fc00::1]/",
            "http://[fdab::12]/",
            "http://[fe80::1]/",
        ];
        for url in blocked {
            assert!(
                matches!(check_url(url), Err(EgressViolation::BlockedAddress(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn boundary_ranges_are_exact() {
        // 172.15 and 172.32 sit just outside 172.16/12.
        assert!(check_url("http://172.15.0.1/").is_ok());
        assert!(check_url("http://172.32.0.1/").is_ok());
        // 169.253 is outside 169.254/16.
        assert!(check_url("http://169.253.1.1/").is_ok());
    }

    #[test]
    fn v4_mapped_v6_is_blocked_like_v4() {
        assert!(matches!(
            check_url("http://[::ffff:10.0.0.1]/"),
            Err(EgressViolation::BlockedAddress(_))
        ));
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let headers = vec![
            ("Authorization".to_owned(), "Bearer abc".to_owned()),
            ("Content-Type".to_owned(), "text/html".to_owned()),
            ("Set-Cookie".to_owned(), "sid=1".to_owned()),
        ];
        let redacted = redact_headers(&headers);
        assert_eq!(redacted[0].1, "[redacted]");
        assert_eq!(redacted[1].1, "text/html");
        assert_eq!(redacted[2].1, "[redacted]");
    }
}
