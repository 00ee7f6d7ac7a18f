#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{self, Body};
use axum::http::{Request, Response};
use broker_bus::{Broker, LocalBroker};
use diet_dispatch::config::{AppConfig, BrokerNames, Role};
use diet_dispatch::routes;
use diet_dispatch::startup;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub async fn build_app(role: Role, names: BrokerNames) -> (Router, Arc<LocalBroker>) {
    let mut cfg = AppConfig::from_lookup(|_| None).expect("default config");
    cfg.role = role;
    cfg.names = names;
    let broker = Arc::new(LocalBroker::new());
    let state = startup::bootstrap(&cfg, broker.clone())
        .await
        .expect("bootstrap against local broker");
    (routes::router(state), broker)
}

/// Router over an arbitrary broker, configured from `pairs` on top of the defaults.
pub async fn build_app_on(pairs: &[(&str, &str)], broker: Arc<dyn Broker>) -> Router {
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let cfg = AppConfig::from_lookup(|key| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .expect("config");
    let state = startup::bootstrap(&cfg, broker)
        .await
        .expect("bootstrap");
    routes::router(state)
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = body::to_bytes(response.into_body(), 1024 * 64)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
