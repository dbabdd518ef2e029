//! Command and frame handlers for the Session
//!
//! Each handler applies one state-machine transition: validating the command
//! against the current state, driving the backend connection, and emitting
//! the resulting status/error/data frames to the client.

use super::{AckWait, Session, SessionState};
use crate::domain::types::{ClientFrame, Command, DataPoint, ResponseFrame, SimParams, StatusKind};
use crate::io::backend::{BackendConnection, BackendEvent};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Session {
    /// Validate a client command against the current state and apply it.
    pub(crate) async fn handle_command(&mut self, command: Command) {
        match (self.state, command) {
            (SessionState::Idle, Command::Start { script, params }) => {
                self.start(script, params).await;
            }
            (SessionState::Running, Command::Update { script, params }) => {
                self.update(script, params).await;
            }
            (SessionState::Starting | SessionState::Running, Command::Stop) => {
                self.stop().await;
            }
            (state, command) => {
                warn!(
                    session = %self.id,
                    command = command.kind(),
                    state = state.as_str(),
                    "command_rejected"
                );
                self.metrics.record_command_rejected();
                self.emit_error(format!(
                    "cannot {} while session is {}",
                    command.kind(),
                    state.as_str()
                ))
                .await;
            }
        }
    }

    /// Idle -> Starting -> Running: open a fresh backend connection, send the
    /// start command and reset the logical clock.
    pub(crate) async fn start(&mut self, script: String, params: SimParams) {
        self.state = SessionState::Starting;
        self.script = script;
        self.params = params;
        self.current_time = params.start_time;
        self.points.clear();
        info!(session = %self.id, script = %self.script, "session_starting");

        let mut backend = match BackendConnection::connect(&self.backend_config).await {
            Ok(backend) => backend,
            Err(e) => {
                error!(session = %self.id, error = %e, "backend_connect_failed");
                self.metrics.record_backend_connect_failed();
                self.state = SessionState::Idle;
                self.emit_error(format!("backend unreachable: {e}")).await;
                return;
            }
        };

        let command = Command::Start { script: self.script.clone(), params };
        if let Err(e) = backend.send(&command).await {
            error!(session = %self.id, error = %e, "backend_start_write_failed");
            backend.close();
            self.state = SessionState::Idle;
            self.emit_error(format!("backend write failed: {e}")).await;
            return;
        }

        self.backend = Some(backend);
        self.state = SessionState::Running;
        self.metrics.record_session_started();
        info!(session = %self.id, script = %self.script, "session_started");
        self.emit_status(StatusKind::Started).await;
    }

    /// Running -> Running: overwrite whichever fields were supplied, forward
    /// the update, and wait (bounded) for the backend to acknowledge. On
    /// timeout the session stays Running; the backend may still be streaming.
    pub(crate) async fn update(&mut self, script: Option<String>, params: Option<SimParams>) {
        if let Some(ref script) = script {
            self.script = script.clone();
        }
        if let Some(params) = params {
            self.params = params;
        }
        info!(session = %self.id, script = %self.script, "session_updating");

        let command = Command::Update { script, params };
        let Some(backend) = self.backend.as_mut() else {
            // Running implies a live connection; reaching here is a bug, but
            // a client error frame beats a crash.
            self.emit_error("no backend connection").await;
            return;
        };
        if let Err(e) = backend.send(&command).await {
            warn!(session = %self.id, error = %e, "backend_update_write_failed");
            self.teardown_with_error("backend write failed").await;
            return;
        }

        match self.wait_for_ack(StatusKind::Updated).await {
            AckWait::Acked => {
                debug!(session = %self.id, "update_acknowledged");
                self.emit_status(StatusKind::Updated).await;
            }
            AckWait::TimedOut => {
                warn!(session = %self.id, "update_ack_timeout");
                self.metrics.record_ack_timeout();
                self.emit_error("Timeout waiting for backend response").await;
            }
            AckWait::Ended => {}
        }
    }

    /// {Starting,Running} -> Stopping -> Idle: send the stop command, wait
    /// (bounded) for the acknowledgment, then tear down unconditionally. The
    /// settle pause at the end keeps a queued start from opening a second
    /// connection before the engine has let go of this one.
    pub(crate) async fn stop(&mut self) {
        self.state = SessionState::Stopping;
        info!(session = %self.id, "session_stopping");

        if let Some(backend) = self.backend.as_mut() {
            match backend.send(&Command::Stop).await {
                Ok(()) => match self.wait_for_ack(StatusKind::Stopped).await {
                    AckWait::Acked => debug!(session = %self.id, "stop_acknowledged"),
                    AckWait::TimedOut => {
                        warn!(session = %self.id, "stop_ack_timeout");
                        self.metrics.record_ack_timeout();
                    }
                    AckWait::Ended => {}
                },
                Err(e) => {
                    warn!(session = %self.id, error = %e, "backend_stop_write_failed");
                }
            }
        }

        // Teardown happens whether or not the backend ever acknowledged.
        self.close_backend();
        self.state = SessionState::Idle;
        self.metrics.record_session_stopped();
        self.emit_status(StatusKind::Stopped).await;
        info!(session = %self.id, "session_stopped");

        tokio::time::sleep(self.settle_delay).await;
    }

    /// Wait for a status acknowledgment of the given kind, forwarding data
    /// frames that arrive in the meantime so the stream stays in order.
    pub(crate) async fn wait_for_ack(&mut self, want: StatusKind) -> AckWait {
        let deadline = Instant::now() + self.ack_timeout;

        loop {
            let Some(backend) = self.backend.as_mut() else {
                return AckWait::Ended;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return AckWait::TimedOut;
            }

            let event = match tokio::time::timeout(remaining, backend.receive_frame()).await {
                Err(_) => return AckWait::TimedOut,
                Ok(Err(e)) => {
                    error!(session = %self.id, error = %e, "backend_read_failed");
                    self.teardown_with_error("backend read failed").await;
                    return AckWait::Ended;
                }
                Ok(Ok(event)) => event,
            };

            match event {
                BackendEvent::Frame(ResponseFrame::Status { state, .. }) if state == want => {
                    return AckWait::Acked;
                }
                BackendEvent::Frame(frame) => {
                    self.metrics.record_frame_received();
                    self.handle_frame(frame).await;
                    if self.backend.is_none() {
                        // A terminal status arrived instead of the ack.
                        return AckWait::Ended;
                    }
                }
                BackendEvent::ParseSkipped => {
                    self.metrics.record_frame_unparseable();
                }
                BackendEvent::EndOfStream => {
                    self.teardown_with_error("backend closed the connection").await;
                    return AckWait::Ended;
                }
            }
        }
    }

    /// Route one normalized backend event while streaming.
    pub(crate) async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Frame(frame) => {
                self.metrics.record_frame_received();
                self.handle_frame(frame).await;
            }
            BackendEvent::ParseSkipped => {
                // A single malformed frame never terminates the session; the
                // stream self-heals on the next well-formed one.
                self.metrics.record_frame_unparseable();
            }
            BackendEvent::EndOfStream => {
                warn!(session = %self.id, "backend_disconnected");
                self.teardown_with_error("backend closed the connection").await;
            }
        }
    }

    /// Route one parsed frame: data is forwarded with clock pairing, status
    /// frames drive the state machine, everything else is relayed.
    pub(crate) async fn handle_frame(&mut self, frame: ResponseFrame) {
        match frame {
            ResponseFrame::DataBatch(values) => self.forward_values(&values).await,
            ResponseFrame::Numeric(value) => self.forward_values(&[value]).await,
            ResponseFrame::Status { state: StatusKind::Completed, .. } => {
                info!(session = %self.id, points = self.points.len(), "session_completed");
                self.flush_results().await;
                self.close_backend();
                self.state = SessionState::Idle;
                self.metrics.record_session_completed();
                self.emit_status(StatusKind::Completed).await;
            }
            ResponseFrame::Status { state: StatusKind::Stopped, .. } => {
                info!(session = %self.id, "backend_declared_stopped");
                self.close_backend();
                self.state = SessionState::Idle;
                self.emit_status(StatusKind::Stopped).await;
            }
            ResponseFrame::Status { state: StatusKind::Error, message } => {
                let message = message.unwrap_or_else(|| "backend error".to_string());
                error!(session = %self.id, error = %message, "backend_reported_error");
                // During an explicit stop the only terminal frame the client
                // sees is {status: stopped}; teardown_with_error suppresses
                // the error frame in that state.
                self.teardown_with_error(&message).await;
            }
            ResponseFrame::Status { state, .. } => {
                // Unsolicited started/updated outside an ack wait; relay.
                self.emit_status(state).await;
            }
            ResponseFrame::NamedVariable { name, value } => {
                self.emit(ClientFrame::Variable { name, value }).await;
            }
            ResponseFrame::Dictionary(map) => {
                self.emit(ClientFrame::Object(map)).await;
            }
        }
    }

    /// Pair backend values with the logical clock and forward the whole
    /// batch to the client in one message, preserving arrival order.
    pub(crate) async fn forward_values(&mut self, values: &[f64]) {
        if values.is_empty() {
            return;
        }

        let mut batch = Vec::with_capacity(values.len());
        for &y in values {
            batch.push(DataPoint { x: self.current_time, y });
            self.current_time += self.params.time_step;
        }

        self.points.extend_from_slice(&batch);
        self.metrics.record_points_forwarded(batch.len() as u64);
        debug!(session = %self.id, count = batch.len(), t = self.current_time, "points_forwarded");
        self.emit(ClientFrame::Points(batch)).await;
    }

    /// Hand the accumulated run to the result sink. The session never
    /// depends on the sink's outcome.
    pub(crate) async fn flush_results(&mut self) {
        if self.points.is_empty() {
            return;
        }
        if let Err(e) = self.sink.publish(&self.script, &self.params, &self.points).await {
            error!(session = %self.id, error = %e, "results_publish_failed");
        }
        self.points.clear();
    }

    /// Close the backend, return to Idle, and notify the client. During an
    /// explicit stop the client gets `{status: stopped}` instead, so the
    /// error frame is suppressed.
    pub(crate) async fn teardown_with_error(&mut self, message: &str) {
        self.close_backend();
        let was_stopping = self.state == SessionState::Stopping;
        self.state = SessionState::Idle;
        if !was_stopping {
            self.emit_error(message).await;
        }
    }
}
