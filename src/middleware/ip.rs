//! Client address resolution behind reverse proxies.
//!
//! # Algorithm
//!
//! `X-Forwarded-For` is appended to by every hop, so the right-most entries
//! were written by the proxies closest to us. The socket peer is the newest
//! hop of all: when it is outside the trusted ranges it is the client and
//! the header is not read. Otherwise the resolver walks the chain from the
//! most recent hop backward:
//!
//! - empty entries (`"1.2.3.4,"`) are skipped
//! - entries inside a trusted CIDR range are skipped (our own proxies)
//! - the first entry outside every range is the client
//! - an entry that is not an IP address stops the walk; nothing to its left
//!   can be attributed to a trusted hop
//!
//! When the walk finds nobody, the socket peer is the client. Without a peer
//! (requests driven in-process) the chain is walked as is, and an empty walk
//! gives [`UNKNOWN_IP`].
//!
//! # Deployment
//!
//! Configure `TRUSTED_PROXIES` with the ranges your load balancers live in.
//! The default is the RFC 1918 private networks.
//!
//! ```text
//! X-Forwarded-For: 203.0.113.7, 198.51.100.2, 10.0.0.5      peer 10.0.0.9
//!                  ^client?     ^untrusted    ^trusted -> skip
//!                               returned
//! ```

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Header carrying the forwarded-address chain.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Fallback value when no client address can be determined.
///
/// All such requests share this key in the rate limiter.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse CIDR notation (e.g., "10.0.0.0/8" or "::1/128"). A bare address
    /// is a single-host range.
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an address is inside this range. IPv4-mapped IPv6 addresses
    /// match IPv4 ranges.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(*ip, IpAddr::V4),
            IpAddr::V4(_) => *ip,
        };

        match (&self.network, &ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Trusted proxy ranges, parsed once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Parse CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        debug!(count = ranges.len(), "Trusted proxy ranges loaded");
        Self { ranges }
    }

    /// Number of usable ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Check if an address belongs to a trusted proxy. With no ranges
    /// configured nothing is trusted.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Parse one forwarded entry. Some proxies append a port.
fn parse_hop(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

/// Resolve the original client address from a forwarded chain and the
/// socket peer.
///
/// # Returns
///
/// `Cow<'static, str>`: borrowed for the [`UNKNOWN_IP`] fallback, owned
/// otherwise.
pub fn resolve_client_address(
    forwarded: Option<&str>,
    peer: Option<IpAddr>,
    trusted: &TrustedProxyConfig,
) -> Cow<'static, str> {
    // A direct client could write anything into the header
    if let Some(ip) = peer
        && !trusted.is_trusted(&ip)
    {
        return Cow::Owned(ip.to_string());
    }

    if let Some(chain) = forwarded {
        for entry in chain.rsplit(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }
            let Some(hop) = parse_hop(entry) else {
                debug!(entry = %entry, "Unparseable X-Forwarded-For entry, using peer");
                break;
            };
            if !trusted.is_trusted(&hop) {
                return Cow::Owned(hop.to_string());
            }
        }
    }

    match peer {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Resolve the client address of a request.
///
/// Multiple `X-Forwarded-For` headers are read as one chain in arrival
/// order. A non-UTF-8 header is treated as unparseable. The peer comes from
/// axum's `ConnectInfo<SocketAddr>`, which the lifecycle controller attaches
/// to every request.
pub fn client_address<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> Cow<'static, str> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut values = req.headers().get_all(FORWARDED_FOR_HEADER).iter().peekable();
    if values.peek().is_none() {
        return resolve_client_address(None, peer, trusted);
    }

    let mut chain = String::new();
    for value in values {
        let Ok(text) = value.to_str() else {
            return resolve_client_address(Some(""), peer, trusted);
        };
        if !chain.is_empty() {
            chain.push(',');
        }
        chain.push_str(text);
    }

    resolve_client_address(Some(&chain), peer, trusted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    fn private_ranges() -> TrustedProxyConfig {
        TrustedProxyConfig::new(&[
            "10.0.0.0/8".to_string(),
            "172.16.0.0/12".to_string(),
            "192.168.0.0/16".to_string(),
        ])
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse(" 192.168.1.1 ").unwrap().prefix_len, 32);
        assert_eq!(CidrRange::parse("0.0.0.0/0").unwrap().prefix_len, 0);
    }

    #[test]
    fn test_cidr_parse_invalid() {
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("::/129").is_none());
        assert!(CidrRange::parse("10.0.0.0/").is_none());
        assert!(CidrRange::parse("10.0.0.0/8/8").is_none());
    }

    #[test]
    fn test_cidr_contains_ipv4() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&ip("10.0.0.1")));
        assert!(cidr.contains(&ip("10.255.255.255")));
        assert!(!cidr.contains(&ip("11.0.0.1")));
        assert!(!cidr.contains(&ip("::1")));
    }

    #[test]
    fn test_cidr_zero_prefix_matches_everything() {
        let cidr = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(cidr.contains(&ip("8.8.8.8")));
    }

    #[test]
    fn test_cidr_contains_ipv6() {
        let cidr = CidrRange::parse("fd00::/8").unwrap();
        assert!(cidr.contains(&ip("fd12:3456::1")));
        assert!(!cidr.contains(&ip("2001:db8::1")));
    }

    #[test]
    fn test_cidr_matches_ipv4_mapped_ipv6() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&ip("::ffff:10.1.2.3")));
    }

    #[test]
    fn test_trusted_proxy_config_skips_invalid() {
        let config = TrustedProxyConfig::new(&["10.0.0.0/8".to_string(), "bogus".to_string()]);
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn test_empty_config_trusts_nothing() {
        let config = TrustedProxyConfig::new(&[]);
        assert!(config.is_empty());
        assert!(!config.is_trusted(&ip("10.0.0.1")));
    }

    // ==========================================================================
    // Resolution Tests
    // ==========================================================================

    #[test]
    fn test_skips_trusted_tail() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let resolved = resolve_client_address(Some("1.2.3.4, 10.0.0.5"), None, &trusted);
        assert_eq!(resolved, "1.2.3.4");
    }

    #[test]
    fn test_returns_most_recent_untrusted_hop() {
        let resolved = resolve_client_address(
            Some("203.0.113.7, 198.51.100.2, 10.0.0.5"),
            Some(ip("10.0.0.9")),
            &private_ranges(),
        );
        assert_eq!(resolved, "198.51.100.2");
    }

    #[test]
    fn test_all_trusted_falls_back_to_peer() {
        let resolved = resolve_client_address(
            Some("10.1.1.1, 192.168.0.4"),
            Some(ip("172.16.5.5")),
            &private_ranges(),
        );
        assert_eq!(resolved, "172.16.5.5");
    }

    #[test]
    fn test_no_header_uses_peer() {
        let resolved = resolve_client_address(None, Some(ip("8.8.4.4")), &private_ranges());
        assert_eq!(resolved, "8.8.4.4");
    }

    #[test]
    fn test_unknown_without_peer_is_borrowed() {
        let resolved = resolve_client_address(Some("10.0.0.1"), None, &private_ranges());
        assert_eq!(resolved, UNKNOWN_IP);
        assert!(matches!(resolved, Cow::Borrowed(_)));
    }

    #[test]
    fn test_unparseable_hop_stops_the_walk() {
        let resolved = resolve_client_address(
            Some("1.2.3.4, garbage, 10.0.0.5"),
            Some(ip("10.0.0.9")),
            &private_ranges(),
        );
        assert_eq!(resolved, "10.0.0.9");
    }

    #[test]
    fn test_empty_and_whitespace_headers_use_peer() {
        for header in ["", "   ", ",,"] {
            let resolved =
                resolve_client_address(Some(header), Some(ip("10.0.0.9")), &private_ranges());
            assert_eq!(resolved, "10.0.0.9", "header {header:?}");
        }
    }

    #[test]
    fn test_untrusted_peer_ignores_forged_chain() {
        for chain in ["198.51.100.7", "198.51.100.8, 10.0.0.5", "garbage"] {
            let resolved =
                resolve_client_address(Some(chain), Some(ip("203.0.113.9")), &private_ranges());
            assert_eq!(resolved, "203.0.113.9", "chain {chain:?}");
        }
    }

    #[test]
    fn test_empty_entries_are_skipped() {
        let resolved =
            resolve_client_address(Some("1.2.3.4,"), Some(ip("10.0.0.9")), &private_ranges());
        assert_eq!(resolved, "1.2.3.4");

        let resolved = resolve_client_address(
            Some("1.2.3.4, , 10.0.0.5,  "),
            Some(ip("10.0.0.9")),
            &private_ranges(),
        );
        assert_eq!(resolved, "1.2.3.4");
    }

    #[test]
    fn test_hop_with_port_and_ipv6() {
        let resolved =
            resolve_client_address(Some("2001:db8::1, 10.0.0.1:443"), None, &private_ranges());
        assert_eq!(resolved, "2001:db8::1");

        let resolved = resolve_client_address(Some("1.2.3.4:5678"), None, &private_ranges());
        assert_eq!(resolved, "1.2.3.4");
    }

    #[test]
    fn test_long_trusted_chain_terminates() {
        let chain = (0..500)
            .map(|i| format!("10.0.{}.{}", i / 256, i % 256))
            .collect::<Vec<_>>()
            .join(", ");
        let resolved = resolve_client_address(Some(&chain), Some(ip("10.9.9.9")), &private_ranges());
        assert_eq!(resolved, "10.9.9.9");
    }

    // ==========================================================================
    // Request-level Tests
    // ==========================================================================

    #[test]
    fn test_client_address_reads_connect_info() {
        let mut req = Request::builder()
            .header(FORWARDED_FOR_HEADER, "10.0.0.3")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("198.51.100.20:4000".parse().unwrap()));

        assert_eq!(client_address(&req, &private_ranges()), "198.51.100.20");
    }

    #[test]
    fn test_client_address_joins_repeated_headers() {
        let req = Request::builder()
            .header(FORWARDED_FOR_HEADER, "203.0.113.1")
            .header(FORWARDED_FOR_HEADER, "10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_address(&req, &private_ranges()), "203.0.113.1");
    }

    #[test]
    fn test_client_address_non_utf8_uses_peer() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.headers_mut().insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_bytes(b"1.2.3.4\xff").unwrap(),
        );

        assert_eq!(client_address(&req, &private_ranges()), UNKNOWN_IP);
    }
}
