/* src/ip.rs */

//! Client IP extraction.
//!
//! Values arriving in `X-Forwarded-For` are trusted as-is; any spoofing
//! concerns are the business of whatever sits in front of this proxy.

use http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The IP of the client a request ultimately originates from.
///
/// `X-Forwarded-For` holds a comma-separated chain where the leftmost entry
/// is the original client; entries may carry an `ip:port` form. When the
/// header is absent the peer address of the connection is used. `None` means
/// no parseable IP was found.
pub(crate) fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get(X_FORWARDED_FOR) {
        let first = forwarded.to_str().ok()?.split(',').next()?.trim();
        let ip: IpAddr = strip_port(first).parse().ok()?;
        return Some(ip.to_string());
    }
    remote.map(|addr| addr.ip().to_string())
}

/// Drops a trailing `:port` from `ip:port` and `[v6]:port` forms, leaving
/// bare IPv6 addresses (with their many colons) untouched.
fn strip_port(value: &str) -> &str {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match value.bytes().filter(|b| *b == b':').count() {
        1 => value.split(':').next().unwrap_or(value),
        _ => value,
    }
}
