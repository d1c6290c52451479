//! Offline batch runner.
//!
//! Drives one task per line from a JSONL task file through the engine and
//! appends one JSONL record per completed task. Records are flushed as they
//! are written, and on start the result file is scanned so already-completed
//! task ids are skipped — an interrupted batch resumes where it left off.
//!
//! A run-level failure records a null result for that task and moves on; it
//! never aborts the batch.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::capability::{CapabilitySuite, ImageRef};
use crate::config::EngineConfig;
use crate::cost::COST;
use crate::error::{BatchError, VantageResult};

/// One task line in the input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTask {
    pub task_id: String,
    pub image_path: PathBuf,
    pub query: String,
}

/// One result line in the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub task_id: String,
    pub query: String,
    /// Bounding box of the confirmed entity; `None` when the target was not
    /// found or the run failed.
    pub result: Option<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts for one batch invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Parse the JSONL task file.
pub fn read_tasks(path: &Path) -> Result<Vec<BatchTask>, BatchError> {
    let file = File::open(path).map_err(|source| BatchError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut tasks = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| BatchError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let task = serde_json::from_str(&line).map_err(|e| BatchError::Record {
            path: path.display().to_string(),
            line: index + 1,
            message: e.to_string(),
        })?;
        tasks.push(task);
    }
    Ok(tasks)
}

/// Task ids already present in the result file. A missing file means a fresh
/// batch; malformed lines are skipped with a warning rather than blocking
/// the resume.
pub fn completed_ids(path: &Path) -> Result<HashSet<String>, BatchError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(source) => {
            return Err(BatchError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let mut ids = HashSet::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| BatchError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BatchRecord>(&line) {
            Ok(record) => {
                ids.insert(record.task_id);
            }
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping malformed result record");
            }
        }
    }
    Ok(ids)
}

/// Run every task not yet recorded, appending one record per task.
pub fn run(
    tasks_path: &Path,
    results_path: &Path,
    suite: Arc<CapabilitySuite>,
    config: &EngineConfig,
) -> VantageResult<BatchSummary> {
    let tasks = read_tasks(tasks_path)?;
    let completed = completed_ids(results_path)?;
    if !completed.is_empty() {
        tracing::info!(count = completed.len(), "resuming batch, skipping completed tasks");
    }

    let mut output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(results_path)
        .map_err(|source| BatchError::Io {
            path: results_path.display().to_string(),
            source,
        })?;

    let total = tasks.len();
    let mut summary = BatchSummary::default();

    for (index, task) in tasks.into_iter().enumerate() {
        if completed.contains(&task.task_id) {
            tracing::info!(task = %task.task_id, "skipping {}/{total}", index + 1);
            summary.skipped += 1;
            continue;
        }
        tracing::info!(task = %task.task_id, query = %task.query, "processing {}/{total}", index + 1);

        let mut agent = Agent::new(
            ImageRef(task.image_path.clone()),
            task.query.clone(),
            Arc::clone(&suite),
            config,
        );
        let record = match agent.run() {
            Ok(result) => {
                summary.completed += 1;
                BatchRecord {
                    task_id: task.task_id,
                    query: task.query,
                    result: result.map(|entity| entity.bbox),
                    error: None,
                }
            }
            Err(err) => {
                // Counted as a runtime failure downstream; the batch goes on.
                tracing::error!(task = %task.task_id, error = %err, "task failed");
                summary.failed += 1;
                BatchRecord {
                    task_id: task.task_id,
                    query: task.query,
                    result: None,
                    error: Some(err.to_string()),
                }
            }
        };

        let line = serde_json::to_string(&record).expect("record serializes");
        writeln!(output, "{line}").map_err(|source| BatchError::Io {
            path: results_path.display().to_string(),
            source,
        })?;
        output.flush().map_err(|source| BatchError::Io {
            path: results_path.display().to_string(),
            source,
        })?;

        tracing::info!(
            cost = COST.cost(),
            input_tokens = COST.input_tokens(),
            output_tokens = COST.output_tokens(),
            "cumulative usage"
        );
    }

    Ok(summary)
}
