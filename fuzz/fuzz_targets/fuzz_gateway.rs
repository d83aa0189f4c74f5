//! Fuzz testing for the gateway's header and filter parsing.
//!
//! Every input here arrives straight from a client, before authentication.
//! The target checks that parsing:
//!
//! - Never panics on any input
//! - Never returns an empty bearer token
//! - Always resolves some client address, falling back to the peer
//! - Never reads a forwarded chain sent by an untrusted peer
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the gateway fuzz target
//! cargo +nightly fuzz run fuzz_gateway
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_gateway -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `parse_bearer`: `Authorization` header parsing
//! - `resolve_client_address`: `X-Forwarded-For` chain walking
//! - `FieldName::parse`: list filter field validation

#![no_main]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lms_gateway::middleware::{TrustedProxyConfig, parse_bearer, resolve_client_address};
use lms_gateway::store::FieldName;

#[derive(Debug, Arbitrary)]
struct GatewayInput<'a> {
    authorization: &'a str,
    forwarded: Option<&'a str>,
    peer: Option<[u8; 4]>,
    field: &'a str,
}

fn trusted() -> &'static TrustedProxyConfig {
    static TRUSTED: OnceLock<TrustedProxyConfig> = OnceLock::new();
    TRUSTED.get_or_init(|| {
        TrustedProxyConfig::new(&[
            "10.0.0.0/8".to_string(),
            "127.0.0.1/32".to_string(),
            "::1/128".to_string(),
        ])
    })
}

fuzz_target!(|input: GatewayInput<'_>| {
    if let Some(token) = parse_bearer(input.authorization) {
        assert!(!token.is_empty());
        assert!(input.authorization.ends_with(token));
    }

    let peer = input.peer.map(|o| IpAddr::V4(Ipv4Addr::from(o)));
    let resolved = resolve_client_address(input.forwarded, peer, trusted());
    assert!(!resolved.is_empty());
    if let Some(peer) = peer
        && (input.forwarded.is_none() || !trusted().is_trusted(&peer))
    {
        assert_eq!(resolved, peer.to_string());
    }

    if let Ok(name) = FieldName::parse(input.field) {
        assert_eq!(name.as_str(), input.field);
    }
});
