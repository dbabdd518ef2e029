//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Default)]
pub struct Metrics {
    clients_connected: AtomicU64,
    clients_disconnected: AtomicU64,
    commands_received: AtomicU64,
    commands_rejected: AtomicU64,
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_stopped: AtomicU64,
    backend_connect_failures: AtomicU64,
    frames_received: AtomicU64,
    frames_unparseable: AtomicU64,
    points_forwarded: AtomicU64,
    ack_timeouts: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_disconnected(&self) {
        self.clients_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_received(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_stopped(&self) {
        self.sessions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_connect_failed(&self) {
        self.backend_connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_unparseable(&self) {
        self.frames_unparseable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_points_forwarded(&self, count: u64) {
        self.points_forwarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for reporting. Totals are cumulative, not
    /// per-interval.
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            reported_at: Instant::now(),
            clients_connected: self.clients_connected.load(Ordering::Relaxed),
            clients_disconnected: self.clients_disconnected.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_stopped: self.sessions_stopped.load(Ordering::Relaxed),
            backend_connect_failures: self.backend_connect_failures.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_unparseable: self.frames_unparseable.load(Ordering::Relaxed),
            points_forwarded: self.points_forwarded.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub reported_at: Instant,
    pub clients_connected: u64,
    pub clients_disconnected: u64,
    pub commands_received: u64,
    pub commands_rejected: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_stopped: u64,
    pub backend_connect_failures: u64,
    pub frames_received: u64,
    pub frames_unparseable: u64,
    pub points_forwarded: u64,
    pub ack_timeouts: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            clients = self.clients_connected,
            disconnects = self.clients_disconnected,
            commands = self.commands_received,
            rejected = self.commands_rejected,
            sessions_started = self.sessions_started,
            sessions_completed = self.sessions_completed,
            sessions_stopped = self.sessions_stopped,
            connect_failures = self.backend_connect_failures,
            frames = self.frames_received,
            unparseable = self.frames_unparseable,
            points = self.points_forwarded,
            ack_timeouts = self.ack_timeouts,
            "metrics_summary"
        );
    }
}
