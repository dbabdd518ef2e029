//! Per-client session state machine
//!
//! One session task owns the backend connection and every mutable session
//! field; client commands arrive on an mpsc channel and outbound frames
//! leave on another. Running the command path and the backend stream loop
//! inside a single `select!`-driven task keeps the socket single-consumer,
//! so a stop command can never race a concurrent read, and no locks are
//! needed around session state.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::types::{ClientFrame, Command, DataPoint, SimParams, StatusKind};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::backend::{BackendConfig, BackendConnection, BackendError, BackendEvent};
use crate::io::results::ResultSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Session lifecycle. A backend connection exists iff the state is
/// Starting, Running, or Stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        }
    }
}

/// Outcome of an acknowledgment wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckWait {
    Acked,
    TimedOut,
    /// The session tore down while waiting (backend error, EOF, or a
    /// terminal status frame arrived instead).
    Ended,
}

/// Per-client session coordinating one simulation run with the backend
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) state: SessionState,
    pub(crate) script: String,
    pub(crate) params: SimParams,
    /// Logical clock pairing backend values with time; reset on start,
    /// continued across updates
    pub(crate) current_time: f64,
    pub(crate) backend: Option<BackendConnection>,
    /// Points accumulated for the current run, handed to the result sink on
    /// completion
    pub(crate) points: Vec<DataPoint>,
    pub(crate) backend_config: BackendConfig,
    pub(crate) ack_timeout: Duration,
    pub(crate) settle_delay: Duration,
    pub(crate) out_tx: mpsc::Sender<ClientFrame>,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Session {
    pub fn new(
        id: Uuid,
        config: &Config,
        out_tx: mpsc::Sender<ClientFrame>,
        sink: Arc<dyn ResultSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            script: String::new(),
            params: SimParams::default(),
            current_time: 0.0,
            backend: None,
            points: Vec::new(),
            backend_config: BackendConfig::from_config(config),
            ack_timeout: config.ack_timeout(),
            settle_delay: config.settle_delay(),
            out_tx,
            sink,
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client goes away or shutdown is signaled.
    ///
    /// Commands apply in the order the client sent them; backend frames are
    /// relayed in arrival order. Both inputs interleave on this one task.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let input = self.next_input(&mut cmd_rx, &mut shutdown).await;
            match input {
                Input::Command(command) => self.handle_command(command).await,
                Input::Backend(Ok(event)) => self.handle_backend_event(event).await,
                Input::Backend(Err(e)) => {
                    error!(session = %self.id, error = %e, "backend_read_failed");
                    self.teardown_with_error("backend read failed").await;
                }
                Input::ClientGone => {
                    debug!(session = %self.id, "client_gone");
                    if self.state != SessionState::Idle {
                        // Behave as if a stop were received so the backend
                        // connection is not leaked.
                        self.stop().await;
                    }
                    return;
                }
                Input::Shutdown => {
                    info!(session = %self.id, "session_shutdown");
                    if self.state != SessionState::Idle {
                        self.stop().await;
                    }
                    return;
                }
            }
        }
    }

    /// Wait for the next unit of work. The backend arm only exists while a
    /// connection is live; in Idle the task just waits on the client.
    async fn next_input(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<Command>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Input {
        loop {
            if let Some(backend) = self.backend.as_mut() {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        return match command {
                            Some(command) => Input::Command(command),
                            None => Input::ClientGone,
                        };
                    }
                    event = backend.receive_frame() => return Input::Backend(event),
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *shutdown.borrow() {
                            return Input::Shutdown;
                        }
                    }
                }
            } else {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        return match command {
                            Some(command) => Input::Command(command),
                            None => Input::ClientGone,
                        };
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return Input::Shutdown;
                        }
                    }
                }
            }
        }
    }

    pub(crate) async fn emit(&self, frame: ClientFrame) {
        if self.out_tx.send(frame).await.is_err() {
            debug!(session = %self.id, "client_outbound_closed");
        }
    }

    pub(crate) async fn emit_status(&self, status: StatusKind) {
        self.emit(ClientFrame::Status { status }).await;
    }

    pub(crate) async fn emit_error(&self, error: impl Into<String>) {
        self.emit(ClientFrame::Error { error: error.into() }).await;
    }

    /// Release the backend socket. Safe to call on every exit path; the
    /// connection's own close is idempotent.
    pub(crate) fn close_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
    }
}

enum Input {
    Command(Command),
    Backend(Result<BackendEvent, BackendError>),
    ClientGone,
    Shutdown,
}
