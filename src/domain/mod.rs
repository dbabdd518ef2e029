//! Domain models - canonical data types for the bridge
//!
//! This module contains the types used throughout the system:
//! - `Command` - client/backend simulation commands (start/update/stop)
//! - `SimParams` - the ordered 5-tuple of simulation parameters
//! - `ResponseFrame` - one normalized unit of backend output
//! - `DataPoint` - a simulation sample paired with the logical clock
//! - `ClientFrame` - outbound frames relayed to the client

pub mod types;

pub use types::{ClientFrame, Command, DataPoint, ResponseFrame, SimParams, StatusKind};
