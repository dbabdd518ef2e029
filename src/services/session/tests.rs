//! Session state machine tests
//!
//! Each test drives the session against a scripted fake engine on a
//! loopback socket; no real simulation backend is involved.

use super::*;
use crate::domain::types::{ClientFrame, Command, DataPoint, ResponseFrame, SimParams, StatusKind};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::backend::BackendEvent;
use crate::io::results::ResultSink;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct RecordingSink {
    runs: Mutex<Vec<(String, Vec<DataPoint>)>>,
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn publish(
        &self,
        script: &str,
        _params: &SimParams,
        points: &[DataPoint],
    ) -> anyhow::Result<()> {
        self.runs.lock().unwrap().push((script.to_string(), points.to_vec()));
        Ok(())
    }
}

fn sinus_params() -> SimParams {
    SimParams::from([5.0, 0.5, 0.0, 0.1, 1.0])
}

fn test_session(port: u16) -> (Session, mpsc::Receiver<ClientFrame>, Arc<RecordingSink>) {
    let config = Config::default()
        .with_backend_addr("127.0.0.1", port)
        .with_warmup_secs(0)
        .with_ack_timeout_ms(200)
        .with_settle_delay_ms(10);
    let (out_tx, out_rx) = mpsc::channel(64);
    let sink = Arc::new(RecordingSink::default());
    let metrics = Arc::new(Metrics::new());
    let session = Session::new(Uuid::now_v7(), &config, out_tx, sink.clone(), metrics);
    (session, out_rx, sink)
}

async fn recv_frame(out_rx: &mut mpsc::Receiver<ClientFrame>) -> ClientFrame {
    timeout(RECV_TIMEOUT, out_rx.recv()).await.expect("timed out waiting for frame").unwrap()
}

/// Accept one connection and read the initial start command.
async fn accept_started(listener: TcpListener) -> TcpStream {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 1024];
    let n = socket.read(&mut buf).await.unwrap();
    let wire = String::from_utf8_lossy(&buf[..n]);
    assert!(wire.contains(r#""type":"start""#), "unexpected wire command: {wire}");
    socket
}

#[tokio::test]
async fn test_start_resets_clock_and_runs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;

    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.current_time, 0.0);
    assert!(session.backend.is_some());
    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Started });

    let _socket = engine.await.unwrap();
}

#[tokio::test]
async fn test_start_connect_failure_returns_idle() {
    // Bind then drop to get a port with nothing listening
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    assert!(matches!(recv_frame(&mut out_rx).await, ClientFrame::Error { .. }));
}

#[tokio::test]
async fn test_data_batch_pairs_logical_clock() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    session.handle_frame(ResponseFrame::DataBatch(vec![0.0, 0.47, 0.90])).await;

    match recv_frame(&mut out_rx).await {
        ClientFrame::Points(points) => {
            assert_eq!(points.len(), 3);
            assert!((points[0].x - 0.0).abs() < 1e-9);
            assert!((points[1].x - 0.1).abs() < 1e-9);
            assert!((points[2].x - 0.2).abs() < 1e-9);
            assert_eq!(points[1].y, 0.47);
        }
        other => panic!("expected points, got {other:?}"),
    }
    assert!((session.current_time - 0.3).abs() < 1e-9);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_update_while_idle_rejected() {
    let (mut session, mut out_rx, _) = test_session(1);

    session
        .handle_command(Command::Update { script: None, params: Some(sinus_params()) })
        .await;

    assert_eq!(session.state(), SessionState::Idle);
    match recv_frame(&mut out_rx).await {
        ClientFrame::Error { error } => assert!(error.contains("update")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_ack_timeout_stays_running() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    // Engine never acknowledges; the 200ms test timeout expires.
    let new_params = SimParams::from([10.0, 1.0, 0.0, 0.1, 10.0]);
    session.update(None, Some(new_params)).await;

    match recv_frame(&mut out_rx).await {
        ClientFrame::Error { error } => assert!(error.contains("Timeout"), "got: {error}"),
        other => panic!("expected timeout error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.params.amplitude, 10.0);
}

#[tokio::test]
async fn test_update_acknowledged() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    // Awaiting the accept task ensures the engine has drained the start
    // command before the next write, so the two cannot coalesce into one read.
    let mut socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    let engine = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        let wire = String::from_utf8_lossy(&buf[..n]);
        assert!(wire.contains(r#""type":"update""#));
        assert!(wire.contains("cosinus.m"));
        socket.write_all(br#"{"status": "updated"}"#).await.unwrap();
        socket
    });

    session.update(Some("cosinus.m".to_string()), None).await;

    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Updated });
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.script, "cosinus.m");

    let _socket = engine.await.unwrap();
}

#[tokio::test]
async fn test_stop_without_ack_reaches_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    let before = Instant::now();
    session.stop().await;

    // Bounded: the 200ms ack window plus the 10ms settle pause, not forever.
    assert!(before.elapsed() < Duration::from_secs(2));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Stopped });
}

#[tokio::test]
async fn test_stop_acknowledged() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    // Awaiting the accept task ensures the engine has drained the start
    // command before the next write, so the two cannot coalesce into one read.
    let mut socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    let engine = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains(r#""type":"stop""#));
        socket.write_all(br#"{"status": "stopped"}"#).await.unwrap();
        socket
    });

    session.stop().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Stopped });

    let _socket = engine.await.unwrap();
}

#[tokio::test]
async fn test_completed_flushes_results() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, sink) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    session.handle_frame(ResponseFrame::DataBatch(vec![1.0, 2.0])).await;
    let _ = recv_frame(&mut out_rx).await; // points
    session
        .handle_frame(ResponseFrame::Status { state: StatusKind::Completed, message: None })
        .await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    assert_eq!(
        recv_frame(&mut out_rx).await,
        ClientFrame::Status { status: StatusKind::Completed }
    );

    let runs = sink.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].0, "sinus.m");
    assert_eq!(runs[0].1.len(), 2);
}

#[tokio::test]
async fn test_backend_error_frame_tears_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    session
        .handle_frame(ResponseFrame::Status {
            state: StatusKind::Error,
            message: Some("script not found".to_string()),
        })
        .await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    assert_eq!(
        recv_frame(&mut out_rx).await,
        ClientFrame::Error { error: "script not found".to_string() }
    );
}

#[tokio::test]
async fn test_error_during_stop_yields_single_stopped_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    // Awaiting the accept task ensures the engine has drained the start
    // command before the next write, so the two cannot coalesce into one read.
    let mut socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    let engine = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains(r#""type":"stop""#));
        // Engine reports a failure instead of acknowledging the stop
        socket.write_all(br#"{"error": "engine crashed"}"#).await.unwrap();
        socket
    });

    session.stop().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    // The teardown emits exactly one terminal frame, no error before it
    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Stopped });
    assert!(out_rx.try_recv().is_err());

    let _socket = engine.await.unwrap();
}

#[tokio::test]
async fn test_end_of_stream_tears_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    session.handle_backend_event(BackendEvent::EndOfStream).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.backend.is_none());
    assert!(matches!(recv_frame(&mut out_rx).await, ClientFrame::Error { .. }));
}

#[tokio::test]
async fn test_parse_skip_keeps_session_running() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let engine = tokio::spawn(accept_started(listener));

    let (mut session, mut out_rx, _) = test_session(port);
    session.start("sinus.m".to_string(), sinus_params()).await;
    let _socket = engine.await.unwrap();
    let _ = recv_frame(&mut out_rx).await; // started

    session.handle_backend_event(BackendEvent::ParseSkipped).await;

    assert_eq!(session.state(), SessionState::Running);
    assert!(session.backend.is_some());
    // Nothing surfaced to the client
    assert!(out_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_run_loop_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let engine = tokio::spawn(async move {
        let mut socket = accept_started(listener).await;
        socket.write_all(b"[0.0,0.47,0.90]").await.unwrap();
        let mut buf = [0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains(r#""type":"stop""#));
        socket.write_all(br#"{"status": "stopped"}"#).await.unwrap();
        // Hold the socket open until the session has torn down
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let (session, mut out_rx, _) = test_session(port);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(session.run(cmd_rx, shutdown_rx));

    cmd_tx
        .send(Command::Start { script: "sinus.m".to_string(), params: sinus_params() })
        .await
        .unwrap();

    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Started });
    match recv_frame(&mut out_rx).await {
        ClientFrame::Points(points) => {
            assert_eq!(points.len(), 3);
            assert_eq!(points[0].y, 0.0);
            assert_eq!(points[2].y, 0.90);
        }
        other => panic!("expected points, got {other:?}"),
    }

    cmd_tx.send(Command::Stop).await.unwrap();
    assert_eq!(recv_frame(&mut out_rx).await, ClientFrame::Status { status: StatusKind::Stopped });

    drop(cmd_tx);
    timeout(RECV_TIMEOUT, task).await.expect("session task did not finish").unwrap();
    engine.await.unwrap();
}
