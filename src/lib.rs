/* src/lib.rs */

//! Tollgate is a rate-limiting HTTP reverse proxy.
//!
//! Requests are matched against an ordered route table, charged against a
//! per-caller token bucket whose size and refill cadence the route dictates,
//! and forwarded to a single upstream origin while tokens last. Exhausted
//! callers get a `429` telling them how long to wait. Background "gifter"
//! tasks — one per distinct rate — top the buckets up every refill period and
//! reclaim the ones nobody uses.
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use tollgate::{Config, Rate, RateBy, Route, Tollgate, MINUTE};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let routes = vec![Route::new(
//!         regex::Regex::new("/about")?,
//!         ["GET"],
//!         vec![(RateBy::client_ip(), Rate::new(5, MINUTE))],
//!     )];
//!     let config = Config::new("http://localhost:8012".parse()?, routes);
//!     let gate = Tollgate::new(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3012").await?;
//!     axum::serve(
//!         listener,
//!         gate.router()
//!             .into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! Callers can be identified by client IP ([`RateBy::client_ip`]) or by any
//! request header with a validator and an identity mapper attached
//! ([`RateBy::header`]) — see the demo binary for a route that buckets
//! authenticated users by token.

mod boxes;
mod bucket;
mod config;
mod error;
mod gifter;
mod ip;
mod list;
mod memo;
mod proxy;
mod rate;
mod rate_by;
mod route;
mod server;
mod signature;

pub use config::Config;
pub use error::{ConfigError, GateError};
pub use rate::{Rate, DAY, HOUR, MINUTE};
pub use rate_by::{RateBy, SignatureFn, Validator};
pub use route::{Route, RouteRates};
pub use server::Tollgate;
