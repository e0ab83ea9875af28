//! Handler-level tests against mock backend nodes.

mod common;

use std::time::{Duration, Instant};

use common::{dead_url, Behavior, Event, MockNode};
use rpc_relay::http::request::{Method, RequestBuilder};
use rpc_relay::http::response::{Response, StatusCode};
use rpc_relay::proxy::{Forwarder, RelayHandler, RouteTable};
use serde_json::Value;

fn handler(routes: &[(&str, &str)], default: &str, request_timeout: Duration) -> RelayHandler {
    let table = RouteTable::new(routes.iter().copied(), default).unwrap();
    let forwarder = Forwarder::new(Duration::from_secs(1), request_timeout, 1024 * 1024);
    RelayHandler::new(table, forwarder, "test relay", "/health", 8541)
}

async fn post(handler: &RelayHandler, path: &str, body: &[u8]) -> Response {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path(path)
        .header("Content-Type", "application/json")
        .header("Content-Length", body.len().to_string())
        .body(body.to_vec())
        .build()
        .unwrap();
    handler.handle(&req).await
}

async fn call(handler: &RelayHandler, method: Method, path: &str) -> Response {
    let req = RequestBuilder::new().method(method).path(path).build().unwrap();
    handler.handle(&req).await
}

fn assert_cors(response: &Response) {
    assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
    assert_eq!(
        response.header("Access-Control-Allow-Methods"),
        Some("GET, POST, OPTIONS")
    );
    assert_eq!(
        response.header("Access-Control-Allow-Headers"),
        Some("Content-Type")
    );
}

fn json(response: &Response) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_post_to_route_key_reaches_that_backend() {
    let mut b1 = MockNode::spawn(Behavior::Echo).await;
    let reply = br#"{"jsonrpc":"2.0","result":"ok","id":1}"#.to_vec();
    let mut b2 = MockNode::spawn(Behavior::Reply(200, reply.clone())).await;
    let handler = handler(
        &[("node1", b1.url.as_str()), ("node2", b2.url.as_str())],
        "node1",
        Duration::from_secs(5),
    );

    let body = br#"{"jsonrpc":"2.0","method":"x","id":1}"#;
    let response = post(&handler, "/node2", body).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, reply);
    assert_cors(&response);

    let seen = b2.next_request().await;
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.body, body.to_vec());
    assert_eq!(seen.header("Content-Type"), Some("application/json"));
    assert!(b1.stayed_idle().await);
}

#[tokio::test]
async fn test_unknown_path_goes_to_default_base_url() {
    let mut b1 = MockNode::spawn(Behavior::Echo).await;
    let mut b2 = MockNode::spawn(Behavior::Echo).await;
    let handler = handler(
        &[("node1", b1.url.as_str()), ("node2", b2.url.as_str())],
        "node1",
        Duration::from_secs(5),
    );

    let response = post(&handler, "/unknown", b"{}").await;

    assert_eq!(response.status, StatusCode::Ok);
    let seen = b1.next_request().await;
    assert_eq!(seen.path, "/");
    assert!(b2.stayed_idle().await);
}

#[tokio::test]
async fn test_echo_round_trip_is_byte_exact() {
    let mut node = MockNode::spawn(Behavior::Echo).await;
    let handler = handler(&[("node1", node.url.as_str())], "node1", Duration::from_secs(5));

    // Odd spacing, key order and number formatting must survive.
    let body = b"{ \"params\": [1.50, 1e3, \"\\u00e9\"],\"id\":42,  \"method\":\"m\",\"jsonrpc\":\"2.0\" }";
    let response = post(&handler, "/node1/", body).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, body.to_vec());
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert_eq!(node.next_request().await.body, body.to_vec());
}

#[tokio::test]
async fn test_backend_error_status_is_passed_through_as_200() {
    let body = br#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":3}"#.to_vec();
    let node = MockNode::spawn(Behavior::Reply(500, body.clone())).await;
    let handler = handler(&[("node1", node.url.as_str())], "node1", Duration::from_secs(5));

    let response = post(&handler, "/", b"{}").await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, body);
}

#[tokio::test]
async fn test_connection_refused_yields_server_error_envelope() {
    let dead = dead_url();
    let handler = handler(&[("node1", dead.as_str())], "node1", Duration::from_secs(5));

    let response = post(&handler, "/node1", b"{}").await;

    assert!(matches!(
        response.status,
        StatusCode::ServiceUnavailable | StatusCode::BadGateway
    ));
    assert_cors(&response);
    let value = json(&response);
    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["error"]["code"], -32000);
    assert_eq!(value["id"], 1);
    assert!(value["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Node unreachable:"));
}

#[tokio::test]
async fn test_slow_backend_times_out_within_bound() {
    let mut node = MockNode::spawn(Behavior::Hang).await;
    let timeout = Duration::from_millis(300);
    let handler = handler(&[("node1", node.url.as_str())], "node1", timeout);

    let started = Instant::now();
    let response = post(&handler, "/node1", b"{}").await;
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1));
    assert_eq!(response.status, StatusCode::ServiceUnavailable);
    assert_cors(&response);
    let value = json(&response);
    assert_eq!(value["error"]["code"], -32000);
    assert!(value["error"]["message"].as_str().unwrap().contains("timed out"));

    // The backend sees its connection closed once the relay gives up.
    assert!(matches!(node.next_event().await, Some(Event::Request(_))));
    assert!(matches!(node.next_event().await, Some(Event::Closed)));
}

#[tokio::test]
async fn test_options_preflight_on_any_path() {
    let handler = handler(&[("node1", dead_url().as_str())], "node1", Duration::from_secs(1));

    for path in ["/", "/node1", "/anything/else"] {
        let response = call(&handler, Method::OPTIONS, path).await;

        assert_eq!(response.status, StatusCode::Ok);
        assert!(response.body.is_empty());
        assert_cors(&response);
    }
}

#[tokio::test]
async fn test_health_lists_route_keys_without_backends() {
    // Every backend is down; health must still answer.
    let handler = handler(
        &[("node1", dead_url().as_str()), ("node2", dead_url().as_str()), ("node3", dead_url().as_str())],
        "node1",
        Duration::from_secs(1),
    );

    for path in ["/health", "/", "/health?verbose=1"] {
        let response = call(&handler, Method::GET, path).await;

        assert_eq!(response.status, StatusCode::Ok);
        assert_cors(&response);
        let value = json(&response);
        assert_eq!(value["status"], "ok");
        assert_eq!(value["service"], "test relay");
        assert_eq!(value["port"], 8541);
        assert_eq!(value["nodes"], serde_json::json!(["node1", "node2", "node3"]));
    }
}

#[tokio::test]
async fn test_get_elsewhere_is_not_found() {
    let mut node = MockNode::spawn(Behavior::Echo).await;
    let handler = handler(&[("node1", node.url.as_str())], "node1", Duration::from_secs(1));

    let response = call(&handler, Method::GET, "/node1").await;

    assert_eq!(response.status, StatusCode::NotFound);
    assert_cors(&response);
    assert!(node.stayed_idle().await);
}

#[tokio::test]
async fn test_other_methods_are_rejected() {
    let handler = handler(&[("node1", dead_url().as_str())], "node1", Duration::from_secs(1));

    let response = call(&handler, Method::PUT, "/node1").await;

    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert_cors(&response);
}

#[tokio::test]
async fn test_head_is_rejected_without_body() {
    let handler = handler(&[("node1", dead_url().as_str())], "node1", Duration::from_secs(1));

    let response = call(&handler, Method::HEAD, "/health").await;

    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert!(response.body.is_empty());
    assert_eq!(response.header("Content-Length"), Some("0"));
    assert_cors(&response);
}
