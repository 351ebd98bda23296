//! Experiment recording.
//!
//! The generation loop reports progress to an [`ExperimentRecorder`]. Every
//! call is best-effort: the loop logs recorder errors and carries on.
//!
//! [`JsonlRecorder`] appends one JSON event per call to a shared file and
//! keeps per-experiment progress in memory until `finalize`, when a summary
//! event is written.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives progress and outcome events for generation sessions.
pub trait ExperimentRecorder: Send + Sync {
    /// Begin an experiment and return its token.
    fn start(
        &self,
        put_id: &str,
        technique_id: &str,
        settings: &serde_json::Value,
    ) -> Result<String>;

    /// Record one extraction + syntax attempt.
    fn record_code_generation(
        &self,
        token: &str,
        iteration: u32,
        success: bool,
        code: &str,
        raw_response: &str,
    ) -> Result<()>;

    /// Record one test attempt on syntactically valid code.
    fn record_test_generation(
        &self,
        token: &str,
        iteration: u32,
        success: bool,
        code: &str,
        coverage: Option<f64>,
    ) -> Result<()>;

    /// Close the experiment.
    fn finalize(&self, token: &str, summary: &ExperimentSummary) -> Result<()>;
}

/// Final statistics handed to [`ExperimentRecorder::finalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub status: String,
    pub success: bool,
    /// Attempts made.
    pub iterations: u32,
    pub coverage_percent: Option<f64>,
    pub execution_time_secs: Option<f64>,
    pub error: Option<String>,
}

/// Recorder that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl ExperimentRecorder for NoopRecorder {
    fn start(&self, _put_id: &str, _technique_id: &str, _settings: &serde_json::Value) -> Result<String> {
        Ok(String::new())
    }

    fn record_code_generation(&self, _: &str, _: u32, _: bool, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    fn record_test_generation(&self, _: &str, _: u32, _: bool, _: &str, _: Option<f64>) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _: &str, _: &ExperimentSummary) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// JSONL recorder
// ============================================================================

/// One line of the experiments file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentEvent {
    pub experiment_id: String,
    pub event: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// In-memory progress for an open experiment.
#[derive(Debug, Clone, Default)]
struct Progress {
    put_id: String,
    technique_id: String,
    model: String,
    started_at: Option<DateTime<Utc>>,
    code_attempts: u32,
    code_success_at: Option<u32>,
    test_attempts: u32,
    test_success_at: Option<u32>,
    test_coverage: Option<f64>,
}

/// Appends experiment events to a JSONL file.
#[derive(Debug)]
pub struct JsonlRecorder {
    path: PathBuf,
    /// Guards both the open experiments and the file append.
    active: Mutex<HashMap<String, Progress>>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, experiment_id: &str, event: &str, data: serde_json::Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = ExperimentEvent {
            experiment_id: experiment_id.to_string(),
            event: event.to_string(),
            timestamp: Utc::now(),
            data,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let json = serde_json::to_string(&record)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Progress>>> {
        self.active
            .lock()
            .map_err(|_| anyhow::anyhow!("experiment recorder state poisoned"))
    }
}

impl ExperimentRecorder for JsonlRecorder {
    fn start(
        &self,
        put_id: &str,
        technique_id: &str,
        settings: &serde_json::Value,
    ) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let mut active = self.lock()?;

        let model = settings
            .get("llm_model")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();

        self.append(
            &token,
            "start",
            serde_json::json!({
                "put_id": put_id,
                "technique_id": technique_id,
                "settings": settings,
            }),
        )?;

        // Only tracked once the start event is on disk.
        active.insert(
            token.clone(),
            Progress {
                put_id: put_id.to_string(),
                technique_id: technique_id.to_string(),
                model,
                started_at: Some(Utc::now()),
                ..Progress::default()
            },
        );
        debug!("Started experiment {} for {}", token, put_id);
        Ok(token)
    }

    fn record_code_generation(
        &self,
        token: &str,
        iteration: u32,
        success: bool,
        code: &str,
        raw_response: &str,
    ) -> Result<()> {
        let mut active = self.lock()?;
        let Some(progress) = active.get_mut(token) else {
            warn!("Experiment {} not found", token);
            return Ok(());
        };

        progress.code_attempts += 1;
        if success && progress.code_success_at.is_none() {
            progress.code_success_at = Some(iteration);
        }

        self.append(
            token,
            "code_generation",
            serde_json::json!({
                "iteration": iteration,
                "success": success,
                "code": code,
                "response": raw_response,
            }),
        )
    }

    fn record_test_generation(
        &self,
        token: &str,
        iteration: u32,
        success: bool,
        code: &str,
        coverage: Option<f64>,
    ) -> Result<()> {
        let mut active = self.lock()?;
        let Some(progress) = active.get_mut(token) else {
            warn!("Experiment {} not found", token);
            return Ok(());
        };

        progress.test_attempts += 1;
        if success {
            progress.test_success_at = Some(iteration);
            progress.test_coverage = coverage;
        }

        self.append(
            token,
            "test_generation",
            serde_json::json!({
                "iteration": iteration,
                "success": success,
                "tests": code,
                "coverage": coverage,
            }),
        )
    }

    fn finalize(&self, token: &str, summary: &ExperimentSummary) -> Result<()> {
        let mut active = self.lock()?;
        let Some(progress) = active.remove(token) else {
            warn!("Experiment {} not found", token);
            return Ok(());
        };

        let duration_secs = progress
            .started_at
            .map(|start| (Utc::now() - start).num_milliseconds() as f64 / 1000.0);

        self.append(
            token,
            "summary",
            serde_json::json!({
                "put_id": progress.put_id,
                "technique_id": progress.technique_id,
                "model_name": progress.model,
                "code_generation_success": progress.code_success_at.is_some(),
                "code_iterations_needed": progress.code_success_at.unwrap_or(progress.code_attempts),
                "test_generation_success": progress.test_success_at.is_some(),
                "test_iterations_needed": progress.test_success_at.unwrap_or(progress.test_attempts),
                "test_coverage": progress.test_coverage.unwrap_or(0.0),
                "duration_secs": duration_secs,
                "final": summary,
            }),
        )
    }
}

/// Read every event from an experiments file. Unparseable lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<ExperimentEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).context("Failed to open experiments file")?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for line in reader.lines().map_while(std::result::Result::ok) {
        if let Ok(event) = serde_json::from_str::<ExperimentEvent>(&line) {
            events.push(event);
        }
    }
    Ok(events)
}
