//! Shared types for the simulation bridge

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Simulation parameters, carried on the wire as an ordered 5-element array:
/// `[amplitude, frequency, start_time, time_step, end_time]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 5]", from = "[f64; 5]")]
pub struct SimParams {
    pub amplitude: f64,
    pub frequency: f64,
    pub start_time: f64,
    pub time_step: f64,
    pub end_time: f64,
}

impl From<[f64; 5]> for SimParams {
    fn from(v: [f64; 5]) -> Self {
        Self { amplitude: v[0], frequency: v[1], start_time: v[2], time_step: v[3], end_time: v[4] }
    }
}

impl From<SimParams> for [f64; 5] {
    fn from(p: SimParams) -> Self {
        [p.amplitude, p.frequency, p.start_time, p.time_step, p.end_time]
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self::from([5.0, 0.5, 0.0, 0.1, 10.0])
    }
}

/// Client command, tagged on `type`. The same shape is forwarded to the
/// backend engine as compact JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Start {
        script: String,
        params: SimParams,
    },
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<SimParams>,
    },
    Stop,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Update { .. } => "update",
            Command::Stop => "stop",
        }
    }
}

/// Session lifecycle states reported by the backend or relayed to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Started,
    Stopped,
    Updated,
    Completed,
    Error,
}

impl StatusKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "started" => StatusKind::Started,
            "stopped" => StatusKind::Stopped,
            "updated" => StatusKind::Updated,
            "completed" => StatusKind::Completed,
            "error" => StatusKind::Error,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Started => "started",
            StatusKind::Stopped => "stopped",
            StatusKind::Updated => "updated",
            StatusKind::Completed => "completed",
            StatusKind::Error => "error",
        }
    }
}

/// One normalized backend payload, decided once by the parser.
///
/// The engine's responses are untyped JSON-ish text; downstream code matches
/// on this closed set instead of probing keys.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFrame {
    /// A single bare number
    Numeric(f64),
    /// A status or error report, e.g. `{"status": "updated"}`
    Status { state: StatusKind, message: Option<String> },
    /// A named-variable report, e.g. `{"name": "t", "value": 0.3}`
    NamedVariable { name: String, value: serde_json::Value },
    /// Any other JSON mapping, relayed as-is
    Dictionary(serde_json::Map<String, serde_json::Value>),
    /// An ordered batch of numeric simulation outputs
    DataBatch(Vec<f64>),
}

/// One simulation sample paired with the session's logical clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// Outbound frame to the client. Serialized shapes:
/// `{"status": ...}`, `{"error": ...}`, `[{"x": ..., "y": ...}, ...]`,
/// or a pass-through object for variable/dictionary reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Status { status: StatusKind },
    Error { error: String },
    Points(Vec<DataPoint>),
    Variable { name: String, value: serde_json::Value },
    Object(serde_json::Map<String, serde_json::Value>),
}
