//! Results egress - writes completed-run data points to file
//!
//! When the backend declares a run complete, the session hands
//! `(script, params, points)` to a `ResultSink`. The shipped sink appends
//! one JSONL record per run; the session never depends on the outcome.

use crate::domain::types::{epoch_ms, DataPoint, SimParams};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Collaborator seam for run artifacts (plot rendering, file dumps, ...).
/// The core only pushes data through it.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(
        &self,
        script: &str,
        params: &SimParams,
        points: &[DataPoint],
    ) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    script: &'a str,
    params: &'a SimParams,
    points: &'a [DataPoint],
    completed_at_ms: u64,
}

/// Appends one JSON object per completed run to a JSONL file
pub struct JsonlResultSink {
    file_path: String,
}

impl JsonlResultSink {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "results_sink_initialized");
        Self { file_path: file_path.to_string() }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "results_written");
        Ok(())
    }
}

#[async_trait]
impl ResultSink for JsonlResultSink {
    async fn publish(
        &self,
        script: &str,
        params: &SimParams,
        points: &[DataPoint],
    ) -> anyhow::Result<()> {
        let record = ResultRecord { script, params, points, completed_at_ms: epoch_ms() };
        let json = serde_json::to_string(&record)?;
        self.append_line(&json)
            .with_context(|| format!("Failed to append results to {}", self.file_path))?;

        info!(script = %script, points = points.len(), "run_results_egressed");
        Ok(())
    }
}
