/* src/server.rs */

//! The proxy server: request classification, charging, forwarding.
//!
//! Per request: match a route (no match forwards untouched), derive the
//! caller signature, find or lazily create the caller's box and the route's
//! bucket inside it, charge one token, and only then — with every lock long
//! released — call the upstream.

use crate::boxes::ClientBox;
use crate::bucket::{BucketId, Charge};
use crate::config::Config;
use crate::error::{ConfigError, GateError};
use crate::gifter::Gifter;
use crate::memo::Memo;
use crate::proxy::Forwarder;
use crate::rate::Rate;
use crate::rate_by::RateBy;
use crate::route::{self, Route};
use crate::signature::{self, ReqSignature};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{HeaderMap, Request};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Without an explicit `buckets_stale_after`, a full bucket survives this
/// many of its own refill periods untouched before eviction.
const DEFAULT_STALE_PERIODS: u32 = 10;

/// The rate-limiting reverse proxy.
///
/// Build one with [`Tollgate::new`], mount it with [`Tollgate::router`], and
/// serve it with connect info so the client IP scheme has a peer address to
/// fall back on:
///
/// ```ignore
/// let gate = Tollgate::new(config)?;
/// axum::serve(
///     listener,
///     gate.router()
///         .into_make_service_with_connect_info::<std::net::SocketAddr>(),
/// )
/// .await?;
/// ```
pub struct Tollgate {
    routes: Vec<Arc<Route>>,
    forwarder: Forwarder,
    /// Caller boxes, keyed by request signature. Guarded by the outermost of
    /// the three lock levels (server, then box, then bucket).
    boxes: RwLock<HashMap<ReqSignature, Arc<ClientBox>>>,
    /// One gifter per distinct rate; populated at startup, read-only after.
    gifters: HashMap<Rate, Arc<Gifter>>,
    route_memo: Memo<(String, String), Option<Arc<Route>>>,
}

impl Tollgate {
    /// Validates `config`, builds the upstream client, dedupes and starts the
    /// gifters. Requires a tokio runtime (the gifters spawn onto it).
    pub fn new(config: Config) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let forwarder = Forwarder::new(&config.upstream);
        let routes: Vec<Arc<Route>> = config.routes.iter().cloned().map(Arc::new).collect();

        let mut gifters: HashMap<Rate, Arc<Gifter>> = HashMap::new();
        for route in &routes {
            for (_, rate) in route.rates() {
                gifters.entry(*rate).or_insert_with(|| {
                    let stale_after = config
                        .buckets_stale_after
                        .unwrap_or(rate.period() * DEFAULT_STALE_PERIODS);
                    Gifter::new(*rate, stale_after)
                });
            }
        }
        info!(
            upstream = %config.upstream,
            routes = routes.len(),
            gifters = gifters.len(),
            "tollgate ready"
        );

        let gate = Arc::new(Self {
            routes,
            forwarder,
            boxes: RwLock::new(HashMap::new()),
            gifters,
            route_memo: Memo::new(),
        });
        for gifter in gate.gifters.values() {
            gifter.start();
        }
        Ok(gate)
    }

    /// An axum router that rate-limits and forwards every request.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new().fallback(handle).with_state(self.clone())
    }

    /// Stops every gifter. Dropping the server does the same.
    pub fn shutdown(&self) {
        for gifter in self.gifters.values() {
            gifter.stop();
        }
    }

    /// Memoised route lookup. Matching is pure over an immutable table, so
    /// each distinct `(path, method)` pays for the scan once.
    fn route_for(&self, path: &str, method: &str) -> Option<Arc<Route>> {
        let key = (path.to_string(), method.to_ascii_uppercase());
        self.route_memo
            .get_or_compute(&key, || route::route_for(&self.routes, path, method))
    }

    /// Box lookup with the usual double-checked dance: read-lock probe first,
    /// write-lock create only when absent.
    fn box_for(&self, sig: ReqSignature, rate_by: &Arc<RateBy>) -> Arc<ClientBox> {
        if let Some(bx) = self.boxes.read().get(&sig) {
            return bx.clone();
        }
        let mut boxes = self.boxes.write();
        boxes
            .entry(sig.clone())
            .or_insert_with(|| {
                debug!(signature = sig.as_str(), "creating box");
                ClientBox::new(sig.clone(), rate_by.clone())
            })
            .clone()
    }

    /// The whole pre-flight decision for a request that matched `route`:
    /// derive the signature, resolve the bucket, take one token.
    fn charge_for(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        route: &Arc<Route>,
    ) -> Result<(), GateError> {
        let (rate_by, sig) = signature::extract(headers, peer, route)?;
        let Some(rate) = route.rate_for(&rate_by) else {
            // Extraction only hands back schemes taken from this route's own
            // table, so a miss here means that table changed underneath us.
            error!(pattern = route.pattern_str(), "no rate behind a scheme extraction picked");
            return Err(GateError::NoRatesOnRoute {
                pattern: route.pattern_str().to_string(),
            });
        };

        let bx = self.box_for(sig, &rate_by);
        let id = BucketId::for_route_pattern(route.pattern_str());
        let now = Instant::now();
        let outcome = loop {
            // Charging through the box's read lock pins the bucket: the
            // gifter needs the write lock to evict, so a bucket we can see
            // cannot vanish mid-charge.
            if let Some(outcome) = bx.charge_bucket(&id, now) {
                break outcome;
            }
            let (bucket, created) = bx.bucket_or_create(id.clone(), rate, now);
            if created {
                match self.gifters.get(&rate) {
                    Some(gifter) => gifter.add_bucket(&bucket),
                    // Gifters cover every configured rate; reaching this arm
                    // is a bug, but an unrefilled bucket beats a crash.
                    None => error!(rate = %rate, "no gifter for rate"),
                }
            }
        };

        match outcome {
            Charge::Admitted => Ok(()),
            Charge::Limited { retry_after_secs } => {
                debug!(retry_after_secs, "rate limited");
                Err(GateError::RateLimited { retry_after_secs })
            }
        }
    }

    #[cfg(test)]
    fn gifter_count(&self) -> usize {
        self.gifters.len()
    }

    #[cfg(test)]
    fn box_count(&self) -> usize {
        self.boxes.read().len()
    }
}

impl Drop for Tollgate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle(State(gate): State<Arc<Tollgate>>, req: Request<Body>) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let path = req.uri().path().to_owned();
    let method = req.method().as_str().to_owned();

    if let Some(route) = gate.route_for(&path, &method) {
        debug!(%path, %method, pattern = route.pattern_str(), "request matched route");
        if let Err(denied) = gate.charge_for(req.headers(), peer, &route) {
            return denied.into_response();
        }
    }
    // Either no route claims this request, or the charge went through; both
    // end at the upstream. The bucket lock is long gone by this await.
    match gate.forwarder.forward(req, peer.map(|addr| addr.ip())).await {
        Ok(response) => response,
        Err(denied) => denied.into_response(),
    }
}
