/* src/proxy.rs */

//! The upstream pipe: everything between "this request may pass" and the
//! origin's response.
//!
//! Bodies are streamed in both directions; the forwarder rewrites the target
//! of the request and maintains `X-Forwarded-For`, and otherwise carries the
//! request verbatim.

use crate::error::GateError;
use axum::body::Body;
use http::uri::{Authority, Scheme};
use http::{HeaderValue, Request, Response, Uri, Version};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};
use std::net::IpAddr;
use tracing::debug;

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Hop-by-hop headers never travel past a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Streams requests to a single upstream origin.
pub(crate) struct Forwarder {
    client: HttpClient,
    scheme: Scheme,
    authority: Authority,
}

impl Forwarder {
    /// Builds the shared client. TLS is always available so an `https`
    /// upstream works out of the box; plain `http` skips the handshake.
    pub(crate) fn new(upstream: &Uri) -> Self {
        // First forwarder in the process installs the crypto provider; later
        // ones see an Err and that is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        let https_connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);
        let client = Client::builder(TokioExecutor::new()).build(https_connector);
        Self {
            client,
            scheme: upstream.scheme().cloned().unwrap_or(Scheme::HTTP),
            authority: upstream
                .authority()
                .cloned()
                .expect("validated upstream always has an authority"),
        }
    }

    /// Sends `req` to the upstream, preserving method, path, query, headers
    /// and body, and hands the origin's response back as-is.
    pub(crate) async fn forward(
        &self,
        mut req: Request<Body>,
        peer_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, GateError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| GateError::Upstream(e.into()))?;
        debug!(%target, method = %req.method(), "forwarding to upstream");

        *req.uri_mut() = target;
        *req.version_mut() = Version::HTTP_11;
        strip_hop_by_hop(req.headers_mut());
        append_forwarded_for(req.headers_mut(), peer_ip);

        let mut response = self
            .client
            .request(req)
            .await
            .map_err(|e| GateError::Upstream(e.into()))?;
        strip_hop_by_hop(response.headers_mut());
        Ok(response.map(Body::new))
    }
}

fn strip_hop_by_hop(headers: &mut http::HeaderMap) {
    // Headers the Connection header nominates are hop-by-hop too.
    let nominated: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();
    for name in HOP_BY_HOP.iter().copied().chain(nominated.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

/// Adds the immediate peer to the forwarding chain, keeping whatever chain
/// the request already carried.
fn append_forwarded_for(headers: &mut http::HeaderMap, peer_ip: Option<IpAddr>) {
    let Some(peer_ip) = peer_ip else { return };
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {peer_ip}"),
        None => peer_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, x-tracked"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-tracked", HeaderValue::from_static("1"));
        headers.insert("x-kept", HeaderValue::from_static("1"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-tracked").is_none());
        assert!(headers.get("x-kept").is_some());
    }

    #[test]
    fn forwarded_for_chain_grows_at_the_end() {
        let mut headers = HeaderMap::new();
        let peer: IpAddr = "10.0.0.9".parse().unwrap();
        append_forwarded_for(&mut headers, Some(peer));
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        append_forwarded_for(&mut headers, Some(peer));
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "1.2.3.4, 5.6.7.8, 10.0.0.9"
        );
    }
}
