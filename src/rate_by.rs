/* src/rate_by.rs */

//! Caller identification schemes.
//!
//! A route declares *which* part of a request identifies the caller: the
//! client IP, or a named header together with a validator and a signature
//! mapper. The signature mapper lets several raw header values collapse into
//! one identity (e.g. every JWT of a user mapping to the user id), so they
//! share one set of buckets.

use http::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Header-value validator.
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Maps a raw header value to a stable caller identity.
pub type SignatureFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Sentinel name used in request signatures derived from the client IP.
pub(crate) const IP_KEY: &str = "IP";

#[derive(Clone, PartialEq, Eq)]
enum IdentityKey {
    ClientIp,
    Header(String),
}

/// How to identify the caller of a request.
///
/// Construct with [`RateBy::header`] or [`RateBy::client_ip`] and share the
/// resulting `Arc` between routes; routes holding the same `Arc` pool their
/// callers into the same identity space.
#[derive(Clone)]
pub struct RateBy {
    key: IdentityKey,
    validate: Validator,
    signature: SignatureFn,
    fail_code: StatusCode,
    fail_msg: String,
}

impl RateBy {
    /// Identify callers by the value of the request header `name`.
    ///
    /// `validate` decides whether a value is acceptable; a rejected value is
    /// answered with `fail_code` and `fail_msg`. `signature` maps an accepted
    /// value to the caller identity string.
    pub fn header(
        name: impl Into<String>,
        validate: impl Fn(&str) -> bool + Send + Sync + 'static,
        signature: impl Fn(&str) -> String + Send + Sync + 'static,
        fail_code: StatusCode,
        fail_msg: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: IdentityKey::Header(name.into()),
            validate: Arc::new(validate),
            signature: Arc::new(signature),
            fail_code,
            fail_msg: fail_msg.into(),
        })
    }

    /// Identify callers by client IP (leftmost `X-Forwarded-For` entry, or
    /// the peer address of the connection).
    pub fn client_ip() -> Arc<Self> {
        Arc::new(Self {
            key: IdentityKey::ClientIp,
            // The IP is parsed and therefore validated before it gets here.
            validate: Arc::new(|_| true),
            signature: Arc::new(str::to_owned),
            fail_code: StatusCode::BAD_REQUEST,
            fail_msg: "invalid IP".to_string(),
        })
    }

    pub(crate) fn is_client_ip(&self) -> bool {
        self.key == IdentityKey::ClientIp
    }

    /// The header to read, or `None` for the IP scheme.
    pub(crate) fn header_name(&self) -> Option<&str> {
        match &self.key {
            IdentityKey::ClientIp => None,
            IdentityKey::Header(name) => Some(name),
        }
    }

    /// The name under which signatures of this scheme are namespaced.
    pub(crate) fn key_name(&self) -> &str {
        match &self.key {
            IdentityKey::ClientIp => IP_KEY,
            IdentityKey::Header(name) => name,
        }
    }

    pub(crate) fn validate(&self, value: &str) -> bool {
        (self.validate)(value)
    }

    pub(crate) fn signature_of(&self, value: &str) -> String {
        (self.signature)(value)
    }

    pub(crate) fn fail_code(&self) -> StatusCode {
        self.fail_code
    }

    pub(crate) fn fail_msg(&self) -> &str {
        &self.fail_msg
    }
}

impl fmt::Debug for RateBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateBy")
            .field("key", &self.key_name())
            .field("fail_code", &self.fail_code)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_scheme_runs_the_given_closures() {
        let by_auth = RateBy::header(
            "Authorization",
            |v| v.len() > 1,
            |v| v.to_uppercase(),
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
        );
        assert_eq!(by_auth.header_name(), Some("Authorization"));
        assert_eq!(by_auth.key_name(), "Authorization");
        assert!(!by_auth.is_client_ip());
        assert!(by_auth.validate("abc"));
        assert!(!by_auth.validate("a"));
        assert_eq!(by_auth.signature_of("abc"), "ABC");
        assert_eq!(by_auth.fail_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(by_auth.fail_msg(), "Unauthorized");
    }

    #[test]
    fn ip_scheme_uses_the_sentinel_name() {
        let by_ip = RateBy::client_ip();
        assert!(by_ip.is_client_ip());
        assert_eq!(by_ip.header_name(), None);
        assert_eq!(by_ip.key_name(), "IP");
        assert!(by_ip.validate("1.2.3.4"));
        assert_eq!(by_ip.signature_of("1.2.3.4"), "1.2.3.4");
    }
}
