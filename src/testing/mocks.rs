//! Mock implementations of the loop's collaborators.

use crate::error::{ElenchusError, Result};
use crate::execution::{ExecutionResult, TestInvocation, TestRunner};
use crate::put::{ProgramUnderTest, PutSource};
use crate::recorder::{ExperimentRecorder, ExperimentSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Shared view of a mock's call count, usable after the mock is boxed.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

// ============================================================================
// Test runner
// ============================================================================

/// Scripted test runner.
///
/// Returns the configured results in order, repeating the last one. With no
/// script every run passes. Never spawns a process.
#[derive(Debug, Default)]
pub struct MockTestRunner {
    results: Vec<ExecutionResult>,
    coverage_xml: Option<String>,
    calls: CallCounter,
    invocations: Arc<Mutex<Vec<TestInvocation>>>,
}

impl MockTestRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result to the script.
    #[must_use]
    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.results.push(result);
        self
    }

    /// Write this report whenever coverage is requested.
    #[must_use]
    pub fn with_coverage_report(mut self, xml: &str) -> Self {
        self.coverage_xml = Some(xml.to_string());
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Invocations received so far.
    pub fn invocations(&self) -> Arc<Mutex<Vec<TestInvocation>>> {
        Arc::clone(&self.invocations)
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    async fn run(&self, invocation: &TestInvocation) -> ExecutionResult {
        let call = self.calls.increment() as usize;
        if let Ok(mut seen) = self.invocations.lock() {
            seen.push(invocation.clone());
        }

        if let (Some(xml), Some(cov)) = (&self.coverage_xml, &invocation.coverage) {
            if let Some(parent) = cov.report_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(&cov.report_path, xml);
        }

        self.results
            .get(call)
            .or_else(|| self.results.last())
            .cloned()
            .unwrap_or_else(|| ExecutionResult::completed(0, "1 passed", ""))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Experiment recorder
// ============================================================================

/// Recorder that captures events as short strings.
///
/// Events: `start {put} {technique}`, `code {iteration} {success}`,
/// `test {iteration} {success}`, `finalize {status}`.
#[derive(Debug, Default)]
pub struct MockRecorder {
    events: Mutex<Vec<String>>,
    fail: bool,
}

impl MockRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail without recording.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: String) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("recorder unavailable");
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

impl ExperimentRecorder for MockRecorder {
    fn start(
        &self,
        put_id: &str,
        technique_id: &str,
        _settings: &serde_json::Value,
    ) -> anyhow::Result<String> {
        self.push(format!("start {put_id} {technique_id}"))?;
        Ok(format!("mock-{put_id}"))
    }

    fn record_code_generation(
        &self,
        _token: &str,
        iteration: u32,
        success: bool,
        _code: &str,
        _raw_response: &str,
    ) -> anyhow::Result<()> {
        self.push(format!("code {iteration} {success}"))
    }

    fn record_test_generation(
        &self,
        _token: &str,
        iteration: u32,
        success: bool,
        _code: &str,
        _coverage: Option<f64>,
    ) -> anyhow::Result<()> {
        self.push(format!("test {iteration} {success}"))
    }

    fn finalize(&self, _token: &str, summary: &ExperimentSummary) -> anyhow::Result<()> {
        self.push(format!("finalize {}", summary.status))
    }
}

// ============================================================================
// PUT source
// ============================================================================

/// In-memory PUT source.
#[derive(Debug, Clone)]
pub struct StaticPutSource {
    root: PathBuf,
    puts: HashMap<String, String>,
}

impl Default for StaticPutSource {
    fn default() -> Self {
        Self {
            root: PathBuf::from("puts"),
            puts: HashMap::new(),
        }
    }
}

impl StaticPutSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_put(mut self, put_id: &str, source: &str) -> Self {
        self.puts.insert(put_id.to_string(), source.to_string());
        self
    }

    /// Module root reported to the test runner.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}

impl PutSource for StaticPutSource {
    fn load(&self, put_id: &str) -> Result<ProgramUnderTest> {
        self.puts
            .get(put_id)
            .map(|source| ProgramUnderTest::new(put_id, source.clone()))
            .ok_or_else(|| ElenchusError::PutNotFound {
                put_id: put_id.to_string(),
                path: self.root.join(format!("{put_id}.py")),
            })
    }

    fn module_root(&self) -> &Path {
        &self.root
    }
}
