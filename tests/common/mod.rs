/* tests/common/mod.rs */

//! Shared harness: a real upstream app and a tollgate in front of it, both on
//! ephemeral loopback ports.

// Each integration test binary uses its own slice of this module.
#![allow(dead_code)]

use axum::extract::Path;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tollgate::{Config, Route, Tollgate};

pub const HOME_MSG: &str = "Welcome to home";
pub const ABOUT_MSG: &str = "About";
pub const HEALTH_MSG: &str = "ok";

fn upstream_app() -> Router {
    Router::new()
        .route("/", get(|| async { HOME_MSG }))
        .route("/about", get(|| async { ABOUT_MSG }))
        .route("/healthz", get(|| async { HEALTH_MSG }))
        .route(
            "/page/{page}",
            get(|Path(page): Path<String>| async move { format!("Hello from page {page}") }),
        )
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream_app()).await.unwrap();
    });
    addr
}

/// Boots the upstream and a gate with the given routes; returns the gate and
/// the proxy's base URL.
pub async fn spawn_gate(routes: Vec<Route>) -> (Arc<Tollgate>, String) {
    let upstream = spawn_upstream().await;
    let config = Config::new(format!("http://{upstream}").parse().unwrap(), routes);
    let gate = Tollgate::new(config).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = gate.router();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (gate, format!("http://{addr}"))
}
