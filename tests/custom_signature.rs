/* tests/custom_signature.rs */

//! End-to-end behaviour of header-based caller identification: authenticated
//! callers get their own bucket, invalid credentials are bounced without
//! consuming anyone's tokens.

mod common;

use common::{spawn_gate, HOME_MSG};
use regex::Regex;
use reqwest::StatusCode;
use tollgate::{Rate, RateBy, Route, HOUR};

fn auth_route() -> Vec<Route> {
    let by_auth = RateBy::header(
        "Authorization",
        |token| token.len() > 1,
        str::to_owned,
        axum::http::StatusCode::UNAUTHORIZED,
        "Unauthorized",
    );
    let by_ip = RateBy::client_ip();
    // Small capacities on purpose; large ones would let the gifter replenish
    // mid-test and mask the limit.
    vec![Route::new(
        Regex::new("/").unwrap(),
        ["GET"],
        vec![(by_auth, Rate::new(5, HOUR)), (by_ip, Rate::new(1, HOUR))],
    )]
}

#[tokio::test]
async fn authenticated_and_anonymous_callers_are_separate() {
    let (_gate, base) = spawn_gate(auth_route()).await;
    let client = reqwest::Client::new();

    // The anonymous (IP) bucket has a single token.
    let rsp = client.get(&base).send().await.unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(rsp.text().await.unwrap(), HOME_MSG);
    let rsp = client.get(&base).send().await.unwrap();
    assert_eq!(rsp.status(), StatusCode::TOO_MANY_REQUESTS);

    // A token-carrying caller is unaffected by the drained IP bucket.
    for i in 0..5 {
        let rsp = client
            .get(&base)
            .header("Authorization", "123")
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK, "authenticated request {i}");
    }

    // Invalid credentials: the scheme's own failure answer, and no charge.
    let rsp = client
        .get(&base)
        .header("Authorization", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(rsp.text().await.unwrap(), "Unauthorized");

    // The authenticated bucket is empty now; further requests are limited.
    for _ in 0..2 {
        let rsp = client
            .get(&base)
            .header("Authorization", "123")
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}

#[tokio::test]
async fn tokens_mapping_to_one_identity_share_a_bucket() {
    let by_session = RateBy::header(
        "Authorization",
        |token| token.contains('.'),
        // Everything before the dot names the user; session suffixes vary.
        |token| token.split('.').next().unwrap_or(token).to_string(),
        axum::http::StatusCode::UNAUTHORIZED,
        "Unauthorized",
    );
    let routes = vec![Route::new(
        Regex::new("/").unwrap(),
        ["GET"],
        vec![(by_session, Rate::new(2, HOUR))],
    )];
    let (_gate, base) = spawn_gate(routes).await;
    let client = reqwest::Client::new();

    for token in ["alice.one", "alice.two"] {
        let rsp = client
            .get(&base)
            .header("Authorization", token)
            .send()
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
    }
    // Two sessions, one identity: the shared bucket is empty.
    let rsp = client
        .get(&base)
        .header("Authorization", "alice.three")
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different identity still has its own tokens.
    let rsp = client
        .get(&base)
        .header("Authorization", "bob.one")
        .send()
        .await
        .unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
}
