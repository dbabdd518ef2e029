//! End-to-end bridge test
//!
//! Runs a real gateway against a scripted fake engine on loopback and
//! drives it with a real WebSocket client.

use futures_util::{SinkExt, StreamExt};
use simbridge::infra::{Config, Metrics};
use simbridge::io::{Gateway, JsonlResultSink, ResultSink};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config(backend_port: u16) -> Config {
    let mut temp_file = NamedTempFile::new().unwrap();
    let content = format!(
        r#"
[gateway]
bind = "127.0.0.1"
port = 0

[backend]
host = "127.0.0.1"
port = {backend_port}
warmup_secs = 0
dial_timeout_ms = 1000

[session]
ack_timeout_ms = 300
settle_delay_ms = 10

[telemetry]
enabled = false
"#
    );
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    Config::from_file(temp_file.path()).unwrap()
}

async fn start_gateway(config: Config) -> (std::net::SocketAddr, watch::Sender<bool>) {
    let metrics = Arc::new(Metrics::new());
    let results = NamedTempFile::new().unwrap();
    let sink: Arc<dyn ResultSink> =
        Arc::new(JsonlResultSink::new(results.path().to_str().unwrap()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = Gateway::bind(config, metrics, sink).await.unwrap();
    let addr = gateway.local_addr().unwrap();
    tokio::spawn(gateway.run(shutdown_rx));
    (addr, shutdown_tx)
}

async fn recv_json(
    rx: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> serde_json::Value {
    loop {
        let msg = timeout(RECV_TIMEOUT, rx.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws read failed");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is not json");
        }
    }
}

#[tokio::test]
async fn test_full_session_over_websocket() {
    // Scripted engine: ack the start implicitly by sending data, then ack stop
    let engine_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let engine_port = engine_listener.local_addr().unwrap().port();
    let engine = tokio::spawn(async move {
        let (mut socket, _) = engine_listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];

        let n = socket.read(&mut buf).await.unwrap();
        let wire = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(wire.contains(r#""type":"start""#), "unexpected command: {wire}");
        assert!(wire.contains("sinus.m"));

        socket.write_all(b"[0.0,0.47,0.90]").await.unwrap();

        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains(r#""type":"stop""#));
        socket.write_all(br#"{"status": "stopped"}"#).await.unwrap();

        // Keep the socket open while the session tears down
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let (addr, _shutdown_tx) = start_gateway(test_config(engine_port)).await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text(
        r#"{"type": "start", "script": "sinus.m", "params": [5, 0.5, 0, 0.1, 1]}"#.to_string(),
    ))
    .await
    .unwrap();

    let started = recv_json(&mut rx).await;
    assert_eq!(started["status"], "started");

    let points = recv_json(&mut rx).await;
    let points = points.as_array().expect("expected a point batch");
    assert_eq!(points.len(), 3);
    assert!((points[0]["x"].as_f64().unwrap() - 0.0).abs() < 1e-9);
    assert!((points[1]["x"].as_f64().unwrap() - 0.1).abs() < 1e-9);
    assert!((points[2]["x"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    assert!((points[1]["y"].as_f64().unwrap() - 0.47).abs() < 1e-9);

    tx.send(Message::Text(r#"{"type": "stop"}"#.to_string())).await.unwrap();
    let stopped = recv_json(&mut rx).await;
    assert_eq!(stopped["status"], "stopped");

    tx.close().await.unwrap();
    engine.await.unwrap();
}

#[tokio::test]
async fn test_malformed_command_gets_error_frame() {
    // No engine needed, the command never reaches the session
    let (addr, _shutdown_tx) = start_gateway(test_config(1)).await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text("not json".to_string())).await.unwrap();

    let reply = recv_json(&mut rx).await;
    assert!(reply["error"].as_str().unwrap().contains("invalid command"));

    tx.close().await.unwrap();
}

#[tokio::test]
async fn test_command_in_wrong_state_is_rejected() {
    let (addr, _shutdown_tx) = start_gateway(test_config(1)).await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    // Update with no running session
    tx.send(Message::Text(r#"{"type": "update", "params": [10, 1.0, 0, 0.1, 10]}"#.to_string()))
        .await
        .unwrap();

    let reply = recv_json(&mut rx).await;
    assert!(reply["error"].as_str().unwrap().contains("idle"));

    tx.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_engine_reports_error() {
    // Backend port with nothing listening
    let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = free.local_addr().unwrap().port();
    drop(free);

    let (addr, _shutdown_tx) = start_gateway(test_config(dead_port)).await;
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text(
        r#"{"type": "start", "script": "sinus.m", "params": [5, 0.5, 0, 0.1, 1]}"#.to_string(),
    ))
    .await
    .unwrap();

    let reply = recv_json(&mut rx).await;
    assert!(reply["error"].as_str().unwrap().contains("unreachable"));

    tx.close().await.unwrap();
}
