//! On-disk artifact layout for a generation run.
//!
//! ```text
//! {output_dir}/
//!   tests/test_{put_id}.py              latest candidate, overwritten each iteration
//!   logs/put_{put_id}_iter{n}.log       prompt and raw response
//!   logs/put_{put_id}_iter{n}_run.log   captured stdout, then [stderr]
//!   coverage/{put_id}_iter{n}.xml       Cobertura report
//!   experiments.jsonl                   recorder events
//!   outcomes.jsonl                      one outcome record per PUT
//! ```
//!
//! One session owns a PUT's test path for its lifetime; concurrent sessions
//! for the same PUT are not supported.

use crate::error::{ElenchusError, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Marker separating stderr from stdout in run logs.
pub const STDERR_MARKER: &str = "[stderr]";

/// Resolves artifact paths under an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tests_dir(&self) -> PathBuf {
        self.root.join("tests")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[must_use]
    pub fn coverage_dir(&self) -> PathBuf {
        self.root.join("coverage")
    }

    /// Test artifact for a PUT. The same path is reused every iteration.
    #[must_use]
    pub fn test_file(&self, put_id: &str) -> PathBuf {
        self.tests_dir().join(format!("test_{put_id}.py"))
    }

    #[must_use]
    pub fn interaction_log(&self, put_id: &str, iteration: u32) -> PathBuf {
        self.logs_dir()
            .join(format!("put_{put_id}_iter{iteration}.log"))
    }

    #[must_use]
    pub fn run_log(&self, put_id: &str, iteration: u32) -> PathBuf {
        self.logs_dir()
            .join(format!("put_{put_id}_iter{iteration}_run.log"))
    }

    #[must_use]
    pub fn coverage_report(&self, put_id: &str, iteration: u32) -> PathBuf {
        self.coverage_dir()
            .join(format!("{put_id}_iter{iteration}.xml"))
    }

    #[must_use]
    pub fn experiments_file(&self) -> PathBuf {
        self.root.join("experiments.jsonl")
    }

    #[must_use]
    pub fn outcomes_file(&self) -> PathBuf {
        self.root.join("outcomes.jsonl")
    }

    /// Write the timestamped prompt/response log for one iteration.
    pub fn write_interaction_log(
        &self,
        put_id: &str,
        iteration: u32,
        prompt: &str,
        response: &str,
    ) -> Result<PathBuf> {
        let path = self.interaction_log(put_id, iteration);
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let content = format!(
            "[{ts}] Processing PUT: {put_id} (iteration {iteration})\n\
             [{ts}] Prompt sent to LLM:\n{prompt}\n\n\
             [{ts}] LLM Response received:\n{response}\n"
        );
        write_file(&path, &content)?;
        Ok(path)
    }

    /// Write the captured output of one test run.
    pub fn write_run_log(
        &self,
        put_id: &str,
        iteration: u32,
        stdout: &str,
        stderr: &str,
    ) -> Result<PathBuf> {
        let path = self.run_log(put_id, iteration);
        write_file(&path, &format_run_log(stdout, stderr))?;
        Ok(path)
    }
}

/// Render stdout followed by a `[stderr]` section when stderr is non-empty.
#[must_use]
pub fn format_run_log(stdout: &str, stderr: &str) -> String {
    let mut content = stdout.to_string();
    if !stderr.is_empty() {
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(STDERR_MARKER);
        content.push('\n');
        content.push_str(stderr);
    }
    content
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ElenchusError::artifact(parent, e.to_string()))?;
    }
    fs::write(path, content).map_err(|e| ElenchusError::artifact(path, e.to_string()))
}
