//! External interfaces
//!
//! - `gateway` - WebSocket listener for simulation clients
//! - `backend` - TCP connection to the simulation engine
//! - `parser` - tolerant decoder for backend response text
//! - `results` - completed-run egress (JSONL sink)
//! - `telemetry` - MQTT telemetry listener

pub mod backend;
pub mod gateway;
pub mod parser;
pub mod results;
pub mod telemetry;

pub use backend::{BackendConnection, BackendError, BackendEvent};
pub use gateway::Gateway;
pub use results::{JsonlResultSink, ResultSink};
