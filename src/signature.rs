/* src/signature.rs */

//! Request signature extraction.
//!
//! Given a request and the route it matched, derive the caller identity the
//! buckets are keyed under. Header-based schemes are tried first, in the
//! order the route declares them; the IP scheme is the fallback when no
//! declared header is on the request.

use crate::error::GateError;
use crate::ip::client_ip;
use crate::rate_by::RateBy;
use crate::route::Route;
use http::HeaderMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Canonical caller identity. Two requests with equal signatures share a box
/// and therefore every bucket inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReqSignature(String);

impl ReqSignature {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Builds a signature directly; unit-test constructor.
#[cfg(test)]
pub(crate) fn tests_id(raw: &str) -> ReqSignature {
    ReqSignature(raw.to_string())
}

fn req_signature(rate_by: &RateBy, value: &str) -> ReqSignature {
    ReqSignature(format!("{}-{}", rate_by.key_name(), rate_by.signature_of(value)))
}

/// Picks the identification scheme the request satisfies and builds its
/// signature, or says why the request must be rejected.
pub(crate) fn extract(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    route: &Route,
) -> Result<(Arc<RateBy>, ReqSignature), GateError> {
    let rates = route.rates();
    if rates.is_empty() {
        return Err(GateError::NoRatesOnRoute {
            pattern: route.pattern_str().to_string(),
        });
    }

    let mut ip_scheme: Option<&Arc<RateBy>> = None;
    let mut picked: Option<(&Arc<RateBy>, String)> = None;
    for (rate_by, _) in rates {
        if rate_by.is_client_ip() {
            ip_scheme.get_or_insert(rate_by);
            continue;
        }
        let name = rate_by.header_name().expect("header scheme without a name");
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                picked = Some((rate_by, value.to_string()));
                break;
            }
        }
    }

    let (rate_by, value) = match picked {
        Some(found) => found,
        None => match ip_scheme {
            Some(rate_by) => {
                let ip = client_ip(headers, remote).ok_or(GateError::InvalidIp)?;
                (rate_by, ip)
            }
            None => return Err(GateError::SignatureUnavailable),
        },
    };

    if !rate_by.validate(&value) {
        return Err(GateError::ValidationFailed {
            code: rate_by.fail_code(),
            message: rate_by.fail_msg().to_string(),
        });
    }

    Ok((rate_by.clone(), req_signature(rate_by, &value)))
}
