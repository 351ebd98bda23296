//! Persisting and executing candidate tests.
//!
//! [`TestExecutor`] writes the candidate to the PUT's test path and hands it
//! to a [`TestRunner`]. The runner is the only place that knows how a child
//! process is spawned, so alternative sandboxes can be swapped in without
//! touching the iteration loop.
//!
//! A zero exit code is the sole pass criterion. Launch failures and timeouts
//! are reported as runs that did not pass, never as errors.

pub mod pytest;

pub use pytest::PytestRunner;

use crate::artifacts::{write_file, ArtifactLayout};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Exit code reported when the runner could not be launched.
pub const EXIT_CODE_LAUNCH_FAILURE: i32 = 127;

/// Exit code reported when a run exceeded its time bound.
pub const EXIT_CODE_TIMEOUT: i32 = 124;

/// Exit code reported when the child ended without one (killed by a signal).
pub const EXIT_CODE_NO_STATUS: i32 = -1;

/// Captured outcome of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether execution was attempted.
    pub ran: bool,
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The run was killed after exceeding its time bound.
    #[serde(default)]
    pub timed_out: bool,
    /// Wall-clock duration of the run.
    #[serde(default)]
    pub duration_secs: f64,
}

impl ExecutionResult {
    /// Result for a run that was not requested.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            ran: false,
            passed: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            duration_secs: 0.0,
        }
    }

    /// Result for a process that exited with `code`.
    #[must_use]
    pub fn completed(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            ran: true,
            passed: code == 0,
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
            duration_secs: 0.0,
        }
    }

    /// Result for a process that could not be launched.
    #[must_use]
    pub fn launch_failure(diagnostic: impl Into<String>) -> Self {
        Self {
            ran: true,
            passed: false,
            exit_code: Some(EXIT_CODE_LAUNCH_FAILURE),
            stdout: String::new(),
            stderr: diagnostic.into(),
            timed_out: false,
            duration_secs: 0.0,
        }
    }

    /// Result for a run killed after `limit`.
    #[must_use]
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            ran: true,
            passed: false,
            exit_code: Some(EXIT_CODE_TIMEOUT),
            stdout: String::new(),
            stderr: format!(
                "Test execution timed out after {} seconds and was terminated",
                limit.as_secs_f64()
            ),
            timed_out: true,
            duration_secs: limit.as_secs_f64(),
        }
    }

    /// Attach output read from a run before it was cut short. Captured
    /// stderr follows the timeout notice.
    #[must_use]
    pub fn with_partial_output(mut self, stdout: impl Into<String>, stderr: &str) -> Self {
        self.stdout = stdout.into();
        let stderr = stderr.trim_end();
        if !stderr.is_empty() {
            self.stderr = format!("{}\n{}", self.stderr, stderr);
        }
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs_f64();
        self
    }
}

/// Coverage instrumentation requested for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRequest {
    /// Module to measure.
    pub module: String,
    /// Where the Cobertura XML report should be written.
    pub report_path: PathBuf,
}

/// Everything a runner needs to execute one persisted test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInvocation {
    pub test_path: PathBuf,
    /// Directory made importable for the child process only.
    pub module_root: PathBuf,
    pub coverage: Option<CoverageRequest>,
}

/// Executes a persisted test file in an isolated process.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the test file and capture its outcome.
    ///
    /// Implementations must not return errors for launch failures or
    /// timeouts; those are encoded in the [`ExecutionResult`].
    async fn run(&self, invocation: &TestInvocation) -> ExecutionResult;

    /// Runner name for logs.
    fn name(&self) -> &str;
}

/// One request to persist, and optionally run, a candidate.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub code: &'a str,
    pub put_id: &'a str,
    /// Iteration number, used to key the coverage report.
    pub iteration: u32,
    pub module_root: &'a Path,
    pub coverage: bool,
    /// When false the candidate is only persisted.
    pub run: bool,
}

/// Outcome of [`TestExecutor::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub test_path: PathBuf,
    pub result: ExecutionResult,
    /// Report path, present only when coverage was requested, the run
    /// passed and the runner produced the file.
    pub coverage_report: Option<PathBuf>,
}

/// Persists candidates and runs them through a [`TestRunner`].
pub struct TestExecutor {
    runner: Box<dyn TestRunner>,
    layout: ArtifactLayout,
}

impl TestExecutor {
    pub fn new(runner: Box<dyn TestRunner>, layout: ArtifactLayout) -> Self {
        Self { runner, layout }
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Write the candidate to the PUT's test path, replacing any earlier one.
    pub fn persist(&self, put_id: &str, code: &str) -> Result<PathBuf> {
        let path = self.layout.test_file(put_id);
        let mut content = code.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        write_file(&path, &content)?;
        debug!("Persisted candidate for {} to {}", put_id, path.display());
        Ok(path)
    }

    /// Persist the candidate and, if requested, run it.
    ///
    /// # Errors
    ///
    /// Only failures to write the test artifact are errors.
    pub async fn execute(&self, request: ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let test_path = self.persist(request.put_id, request.code)?;

        if !request.run {
            return Ok(ExecutionOutcome {
                test_path,
                result: ExecutionResult::skipped(),
                coverage_report: None,
            });
        }

        let coverage = request.coverage.then(|| CoverageRequest {
            module: request.put_id.to_string(),
            report_path: self.layout.coverage_report(request.put_id, request.iteration),
        });

        if let Some(cov) = &coverage {
            if let Some(parent) = cov.report_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // A report left by an earlier run must not be mistaken for this one.
            if cov.report_path.exists() {
                std::fs::remove_file(&cov.report_path)?;
            }
        }

        let invocation = TestInvocation {
            test_path: test_path.clone(),
            module_root: request.module_root.to_path_buf(),
            coverage,
        };

        debug!(
            "Running {} with {} (coverage: {})",
            test_path.display(),
            self.runner.name(),
            request.coverage
        );
        let result = self.runner.run(&invocation).await;

        let coverage_report = invocation
            .coverage
            .filter(|_| result.passed)
            .map(|c| c.report_path)
            .filter(|p| p.is_file());

        Ok(ExecutionOutcome {
            test_path,
            result,
            coverage_report,
        })
    }
}
