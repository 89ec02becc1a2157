//! Client against a real server over TCP.

use rpclink_client::{new_client, Client, ConnectionConfig};
use rpclink_core::LinkConfig;
use rpclink_protocol::{MethodRegistry, RpcService};
use rpclink_server::{Server, ServerConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct Counter;

impl RpcService for Counter {
    fn methods(&self) -> Vec<&'static str> {
        vec!["len", "upper"]
    }

    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, String> {
        let text = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| "expected a string argument".to_string())?;
        match method {
            "len" => Ok(json!(text.len())),
            "upper" => Ok(json!(text.to_uppercase())),
            other => Err(format!("no such method {}", other)),
        }
    }
}

fn registry(expose_list: bool) -> Arc<MethodRegistry> {
    let registry = Arc::new(MethodRegistry::new().with_method_listing(expose_list));
    registry.add_function("add", |args| {
        let total: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(json!(total))
    }, None);
    registry.add_instance_methods(Arc::new(Counter), Some("text"));
    registry
}

async fn start_server_on(listener: TcpListener, expose_list: bool) -> Arc<Server> {
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(ServerConfig::new(addr), registry(expose_list)));
    let running = server.clone();
    tokio::spawn(async move { running.serve(listener).await });
    server
}

async fn start_server(expose_list: bool) -> (Arc<Server>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (start_server_on(listener, expose_list).await, addr)
}

async fn connected(client: &Client) {
    tokio::time::timeout(Duration::from_secs(5), client.wait_connected())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_call_registered_function() {
    let (server, addr) = start_server(false).await;
    let client = new_client("127.0.0.1", addr.port(), false);
    connected(&client).await;

    let value = client.call("add", &[json!(1), json!(2), json!(39)]).await.unwrap();
    assert_eq!(value, json!(42));

    let value = client.call("text_upper", &[json!("shout")]).await.unwrap();
    assert_eq!(value, json!("SHOUT"));

    client.ping().await.unwrap();
    server.shutdown();
}

#[tokio::test]
async fn test_call_right_after_new_client_succeeds() {
    let (server, addr) = start_server(false).await;
    let client = new_client("127.0.0.1", addr.port(), false);

    let value = client.call("add", &[json!(20), json!(22)]).await.unwrap();
    assert_eq!(value, json!(42));
    server.shutdown();
}

#[tokio::test]
async fn test_method_list_hidden_unless_enabled() {
    let (hidden, addr) = start_server(false).await;
    let client = new_client("127.0.0.1", addr.port(), false);
    connected(&client).await;
    assert!(client.list_methods().await.unwrap().is_empty());
    hidden.shutdown();

    let (listed, addr) = start_server(true).await;
    let client = new_client("127.0.0.1", addr.port(), false);
    connected(&client).await;
    assert_eq!(
        client.list_methods().await.unwrap(),
        vec!["add", "text_len", "text_upper"]
    );
    listed.shutdown();
}

#[tokio::test]
async fn test_remote_error_times_out_caller() {
    let (server, addr) = start_server(false).await;
    let client = new_client("127.0.0.1", addr.port(), false);
    connected(&client).await;

    let result = client
        .call_with_timeout("text_len", &[json!(5)], Duration::from_millis(200))
        .await;
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(client.pending_count(), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_large_payload_crosses_many_frames() {
    let (server, addr) = start_server(false).await;
    let config = ConnectionConfig::new("127.0.0.1", addr.port())
        .with_link_config(LinkConfig::default().with_max_frame_body(64));
    let client = Client::connect(config);
    connected(&client).await;

    let text = "abc".repeat(20_000);
    let value = client.call("text_len", &[json!(text)]).await.unwrap();
    assert_eq!(value, json!(60_000));
    server.shutdown();
}

#[tokio::test]
async fn test_concurrent_callers_share_one_connection() {
    let (server, addr) = start_server(false).await;
    let client = Arc::new(new_client("127.0.0.1", addr.port(), false));
    connected(&client).await;

    let mut handles = Vec::new();
    for i in 0..50i64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.call("add", &[json!(i), json!(1000)]).await.unwrap()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), json!(i as i64 + 1000));
    }

    assert_eq!(server.stats().connections_total.load(std::sync::atomic::Ordering::Relaxed), 1);
    server.shutdown();
}

#[tokio::test]
async fn test_client_started_before_server_connects_later() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConnectionConfig::new("127.0.0.1", addr.port())
        .with_retry_interval(Duration::from_millis(50));
    let client = Client::connect(config);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!client.is_connected());

    let server = start_server_on(TcpListener::bind(addr).await.unwrap(), false).await;
    connected(&client).await;
    assert_eq!(client.call("add", &[json!(2), json!(2)]).await.unwrap(), json!(4));
    server.shutdown();
}

#[tokio::test]
async fn test_server_restart_is_transparent() {
    let (server, addr) = start_server(false).await;
    let config = ConnectionConfig::new("127.0.0.1", addr.port())
        .with_retry_interval(Duration::from_millis(50));
    let client = Client::connect(config);
    connected(&client).await;
    assert_eq!(client.call("add", &[json!(1)]).await.unwrap(), json!(1));

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let restarted = start_server_on(TcpListener::bind(addr).await.unwrap(), false).await;
    connected(&client).await;
    assert_eq!(client.call("add", &[json!(5)]).await.unwrap(), json!(5));
    restarted.shutdown();
}
