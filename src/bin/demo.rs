/* src/bin/demo.rs */

//! Runnable demo: a tiny upstream app with a tollgate in front of it.
//!
//! Starts the upstream on `UPSTREAM_PORT` (default 8012) and the proxy on
//! `PROXY_PORT` (default 3012). Try it:
//!
//! ```sh
//! cargo run --bin tollgate-demo
//! for i in $(seq 1 6); do curl -i http://localhost:3012/about; done
//! ```
//!
//! The sixth request comes back `429` with a retry hint. Authenticated
//! callers (any `Authorization` header longer than one character) get their
//! own, larger bucket on `/`.

use anyhow::{Context, Result};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use dotenvy::dotenv;
use regex::Regex;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tollgate::{Config, Rate, RateBy, Route, Tollgate, HOUR, MINUTE};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let upstream_port = port_from_env("UPSTREAM_PORT", 8012)?;
    let proxy_port = port_from_env("PROXY_PORT", 3012)?;

    let upstream_listener = TcpListener::bind(("127.0.0.1", upstream_port))
        .await
        .with_context(|| format!("binding upstream on port {upstream_port}"))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(upstream_listener, upstream_app()).await {
            tracing::error!(error = %e, "upstream server exited");
        }
    });
    info!(port = %upstream_port, "demo upstream listening");

    let gate = Tollgate::new(demo_config(upstream_port)?)?;
    let proxy_listener = TcpListener::bind(("0.0.0.0", proxy_port))
        .await
        .with_context(|| format!("binding proxy on port {proxy_port}"))?;
    info!(port = %proxy_port, "tollgate listening");

    axum::serve(
        proxy_listener,
        gate.router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    gate.shutdown();
    info!("shut down cleanly");
    Ok(())
}

fn port_from_env(name: &str, default: u16) -> Result<u16> {
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {name}")),
        Err(_) => Ok(default),
    }
}

/// The app being protected. Nothing here knows rate limiting exists.
fn upstream_app() -> Router {
    Router::new()
        .route("/", get(|| async { "Welcome to home" }))
        .route("/about", get(|| async { "About" }))
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/page/{page}",
            get(|Path(page): Path<String>| async move { format!("Hello from page {page}") }),
        )
}

fn demo_config(upstream_port: u16) -> Result<Config> {
    let by_auth = RateBy::header(
        "Authorization",
        |token| token.len() > 1,
        str::to_owned,
        StatusCode::UNAUTHORIZED,
        "Unauthorized",
    );
    let by_ip = RateBy::client_ip();

    let routes = vec![
        // Every page detail shares one small per-caller bucket.
        Route::new(
            Regex::new(r"/page/[^/]+")?,
            ["GET"],
            vec![(by_ip.clone(), Rate::new(2, MINUTE))],
        ),
        Route::new(
            Regex::new("/about")?,
            ["GET"],
            vec![(by_ip.clone(), Rate::new(5, MINUTE))],
        ),
        // Authenticated callers get a roomier bucket than anonymous ones.
        Route::new(
            Regex::new("/")?,
            ["GET", "POST"],
            vec![(by_auth, Rate::new(100, HOUR)), (by_ip, Rate::new(30, HOUR))],
        ),
    ];

    let upstream = format!("http://127.0.0.1:{upstream_port}")
        .parse()
        .context("building upstream url")?;
    Ok(Config::new(upstream, routes))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
