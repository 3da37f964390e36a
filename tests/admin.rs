//! Operator API behaviour.

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use ddos_shield::admin::{setup_admin_router, AdminState};
use ddos_shield::net::ConnectionCounters;
use ddos_shield::security::ip_blocker::IpBlocker;
use ddos_shield::DdosProtection;

mod common;

const KEY: &str = "test-admin-key";

fn admin(protection: &DdosProtection) -> Router {
    setup_admin_router(AdminState::new(protection.clone(), KEY))
}

fn call(method: &str, path: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requires_bearer_key() {
    let app = admin(&common::protection());

    let missing = app.clone().oneshot(call("GET", "/admin/status", None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(call("GET", "/admin/status", Some("nope")))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let ok = app.oneshot(call("GET", "/admin/status", Some(KEY))).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body = json(ok).await;
    assert_eq!(body["status"], "operational");
    assert_eq!(body["circuit_state"], "closed");
}

#[tokio::test]
async fn empty_key_locks_the_api() {
    let app = setup_admin_router(AdminState::new(common::protection(), ""));
    let res = app.oneshot(call("GET", "/admin/status", Some(""))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stats_include_every_component() {
    let protection = common::protection();
    let counters = std::sync::Arc::new(ConnectionCounters::new(32));
    let app = setup_admin_router(
        AdminState::new(protection.clone(), KEY).with_connections(counters),
    );

    let res = app
        .oneshot(call("GET", "/admin/ddos/stats", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = json(res).await;
    assert_eq!(body["circuit_breaker"]["state"], "closed");
    assert_eq!(body["ip_blocker"]["blocked_ips"], 0);
    assert_eq!(body["fingerprinter"]["unique_fingerprints"], 0);
    assert_eq!(body["connections"]["max"], 32);
}

#[tokio::test]
async fn lists_and_lifts_blocks() {
    let protection = common::protection_with_blocker(IpBlocker::new(
        1,
        Duration::from_secs(600),
        Duration::from_secs(60),
    ));
    let ip: IpAddr = "203.0.113.9".parse().unwrap();
    assert!(protection.ip_blocker().record_violation(ip));
    let app = admin(&protection);

    let res = app
        .clone()
        .oneshot(call("GET", "/admin/ddos/blocked", Some(KEY)))
        .await
        .unwrap();
    let body = json(res).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["ip"], "203.0.113.9");
    assert!(entries[0]["remaining_secs"].as_u64().unwrap() <= 600);

    let res = app
        .clone()
        .oneshot(call("DELETE", "/admin/ddos/blocked/203.0.113.9", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json(res).await["was_blocked"], true);
    assert!(!protection.ip_blocker().is_blocked(ip));

    let again = app
        .clone()
        .oneshot(call("DELETE", "/admin/ddos/blocked/203.0.113.9", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(json(again).await["was_blocked"], false);

    let invalid = app
        .oneshot(call("DELETE", "/admin/ddos/blocked/not-an-ip", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn circuit_reset_closes_an_open_breaker() {
    let protection = common::protection();
    let breaker = protection.circuit_breaker();
    // Hold more admissions than the limit so the next one trips the breaker.
    let held: Vec<_> = (0..1_000).map(|_| breaker.allow().unwrap()).collect();
    assert!(breaker.allow().is_err());

    let app = admin(&protection);
    let status = app
        .clone()
        .oneshot(call("GET", "/admin/status", Some(KEY)))
        .await
        .unwrap();
    let body = json(status).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["circuit_state"], "open");

    let res = app
        .oneshot(call("POST", "/admin/ddos/circuit/reset", Some(KEY)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json(res).await["circuit_state"], "closed");

    for admission in held {
        breaker.done(admission, true);
    }
    assert_eq!(breaker.concurrent(), 0);
}
