//! WebSocket gateway for simulation clients
//!
//! Accepts WebSocket connections and gives each client its own session
//! task. The gateway only decodes command frames and relays outbound
//! frames; all session logic lives in the session task.

use crate::domain::types::{ClientFrame, Command};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::results::ResultSink;
use crate::services::session::Session;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket gateway bound to the configured address.
pub struct Gateway {
    listener: TcpListener,
    config: Config,
    metrics: Arc<Metrics>,
    sink: Arc<dyn ResultSink>,
}

impl Gateway {
    /// Bind the gateway listener. Fails if the address is unavailable.
    pub async fn bind(
        config: Config,
        metrics: Arc<Metrics>,
        sink: Arc<dyn ResultSink>,
    ) -> std::io::Result<Self> {
        let addr = format!("{}:{}", config.gateway_bind(), config.gateway_port());
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "gateway_listening");
        Ok(Self { listener, config, metrics, sink })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("gateway_shutdown");
                        return;
                    }
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let config = self.config.clone();
                            let metrics = self.metrics.clone();
                            let sink = self.sink.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                handle_client(socket, addr, config, metrics, sink, shutdown).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "gateway_accept_failed");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    config: Config,
    metrics: Arc<Metrics>,
    sink: Arc<dyn ResultSink>,
    shutdown: watch::Receiver<bool>,
) {
    let session_id = Uuid::now_v7();

    let ws = match tokio_tungstenite::accept_async(socket).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %addr, error = %e, "ws_handshake_failed");
            return;
        }
    };
    metrics.record_client_connected();
    info!(session_id = %session_id, peer = %addr, "client_connected");

    let (mut ws_tx, mut ws_rx) = ws.split();

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(16);
    let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(64);
    // Kept for gateway-level error frames on malformed input
    let gw_out = out_tx.clone();

    let session = Session::new(session_id, &config, out_tx, sink, metrics.clone());
    let session_task = tokio::spawn(session.run(cmd_rx, shutdown));

    // Relay session output to the WebSocket
    let relay_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "outbound_encode_failed");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Inbound loop: decode commands, hand them to the session task
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "ws_read_failed");
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/pong are answered by tungstenite itself
            _ => continue,
        };

        match serde_json::from_str::<Command>(&text) {
            Ok(command) => {
                metrics.record_command_received();
                debug!(session_id = %session_id, kind = command.kind(), "command_received");
                if cmd_tx.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                metrics.record_command_rejected();
                warn!(session_id = %session_id, error = %e, "command_malformed");
                let frame = ClientFrame::Error { error: format!("invalid command: {e}") };
                if gw_out.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Dropping the command sender tells the session the client is gone
    drop(cmd_tx);
    drop(gw_out);
    if let Err(e) = session_task.await {
        error!(session_id = %session_id, error = %e, "session_task_panicked");
    }
    let _ = relay_task.await;

    metrics.record_client_disconnected();
    info!(session_id = %session_id, peer = %addr, "client_disconnected");
}
