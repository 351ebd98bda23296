//! Child-process test runner backed by pytest.

use super::{ExecutionResult, TestInvocation, TestRunner, EXIT_CODE_NO_STATUS};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as AsyncCommand;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a killed run's pipes get to reach EOF before reading stops.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs a test file with `python -m pytest` in a child process.
///
/// The module root is prepended to `PYTHONPATH` for the child only, so the
/// persisted test can `from {put_id} import ...` without modification.
#[derive(Debug, Clone)]
pub struct PytestRunner {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl Default for PytestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PytestRunner {
    /// Runner using `python3 -m pytest -q --tb=short`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_python("python3")
    }

    /// Runner using the given interpreter.
    #[must_use]
    pub fn with_python(python: &str) -> Self {
        Self {
            program: python.to_string(),
            args: ["-m", "pytest", "-q", "--tb=short"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            timeout: None,
        }
    }

    /// Runner using an arbitrary command; the test path is appended last.
    #[must_use]
    pub fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            timeout: None,
        }
    }

    /// Bound each run. `None` waits indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_args(&self, invocation: &TestInvocation) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        if let Some(cov) = &invocation.coverage {
            args.push(format!("--cov={}", cov.module).into());
            let mut report = OsString::from("--cov-report=xml:");
            report.push(cov.report_path.as_os_str());
            args.push(report);
        }
        args.push(invocation.test_path.as_os_str().to_owned());
        args
    }
}

/// `PYTHONPATH` with `module_root` first, followed by any inherited entries.
fn python_path(module_root: &Path) -> OsString {
    let mut paths = vec![module_root.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| module_root.as_os_str().to_owned())
}

#[async_trait]
impl TestRunner for PytestRunner {
    async fn run(&self, invocation: &TestInvocation) -> ExecutionResult {
        let args = self.build_args(invocation);
        debug!("Spawning {} {:?}", self.program, args);

        let started = Instant::now();
        let child = AsyncCommand::new(&self.program)
            .args(&args)
            .env("PYTHONPATH", python_path(&invocation.module_root))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to launch {}: {}", self.program, e);
                return ExecutionResult::launch_failure(format!(
                    "Failed to launch test runner '{}': {}",
                    self.program, e
                ))
                .with_duration(started.elapsed());
            }
        };

        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(
                        "Test run for {} exceeded {:?}; terminated",
                        invocation.test_path.display(),
                        limit
                    );
                    if let Err(e) = child.kill().await {
                        debug!("Failed to kill test runner: {}", e);
                    }
                    let (out, err) = tokio::join!(
                        stdout.finish(Some(DRAIN_GRACE)),
                        stderr.finish(Some(DRAIN_GRACE))
                    );
                    return ExecutionResult::timed_out(limit).with_partial_output(out, &err);
                }
            },
            None => child.wait().await,
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return ExecutionResult::launch_failure(format!(
                    "Failed to collect test runner output: {e}"
                ))
                .with_duration(started.elapsed());
            }
        };

        let (out, err) = tokio::join!(stdout.finish(None), stderr.finish(None));
        let code = status.code().unwrap_or(EXIT_CODE_NO_STATUS);
        debug!("Test runner exited with {} in {:?}", code, started.elapsed());

        ExecutionResult::completed(code, out, err).with_duration(started.elapsed())
    }

    fn name(&self) -> &str {
        "pytest"
    }
}

/// Background reader for one child pipe.
///
/// Bytes land in a shared buffer as they arrive, so output read before a
/// timeout kill is still available afterwards.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut bytes) => bytes.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                }
            }
        });
        Self { buf, task }
    }

    /// Wait for EOF (at most `grace`, if given) and return what was read.
    async fn finish(self, grace: Option<Duration>) -> String {
        let mut task = self.task;
        match grace {
            Some(grace) => {
                if tokio::time::timeout(grace, &mut task).await.is_err() {
                    task.abort();
                }
            }
            None => {
                if let Err(e) = task.await {
                    debug!("Output reader stopped: {}", e);
                }
            }
        }
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CoverageRequest, EXIT_CODE_LAUNCH_FAILURE, EXIT_CODE_TIMEOUT};
    use std::path::PathBuf;

    fn invocation(coverage: Option<CoverageRequest>) -> TestInvocation {
        TestInvocation {
            test_path: PathBuf::from("/out/tests/test_he_0.py"),
            module_root: PathBuf::from("/data/HumanEval"),
            coverage,
        }
    }

    #[test]
    fn test_default_args() {
        let runner = PytestRunner::new();
        let args = runner.build_args(&invocation(None));
        assert_eq!(
            args,
            vec!["-m", "pytest", "-q", "--tb=short", "/out/tests/test_he_0.py"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_coverage_args() {
        let runner = PytestRunner::new();
        let args = runner.build_args(&invocation(Some(CoverageRequest {
            module: "he_0".to_string(),
            report_path: PathBuf::from("/out/coverage/he_0_iter1.xml"),
        })));

        assert!(args.contains(&OsString::from("--cov=he_0")));
        assert!(args.contains(&OsString::from("--cov-report=xml:/out/coverage/he_0_iter1.xml")));
        assert_eq!(args.last(), Some(&OsString::from("/out/tests/test_he_0.py")));
    }

    #[test]
    fn test_python_path_puts_module_root_first() {
        let path = python_path(Path::new("/data/HumanEval"));
        let first = std::env::split_paths(&path).next();
        assert_eq!(first, Some(PathBuf::from("/data/HumanEval")));
    }

    #[tokio::test]
    async fn test_launch_failure_is_a_failed_run() {
        let runner = PytestRunner::with_command("definitely-not-a-real-binary-elenchus", &[]);
        let result = runner.run(&invocation(None)).await;

        assert!(result.ran);
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(EXIT_CODE_LAUNCH_FAILURE));
        assert!(result.stderr.contains("Failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let runner = PytestRunner::with_command("sh", &["-c", "echo out; echo err >&2; exit 3"]);
        let result = runner.run(&invocation(None)).await;

        assert!(result.ran);
        assert!(!result.passed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_passes() {
        let runner = PytestRunner::with_command("sh", &["-c", "exit 0"]);
        let result = runner.run(&invocation(None)).await;
        assert!(result.passed);
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pythonpath_is_injected_for_child() {
        let runner = PytestRunner::with_command("sh", &["-c", "echo \"$PYTHONPATH\""]);
        let result = runner.run(&invocation(None)).await;
        assert!(result.stdout.starts_with("/data/HumanEval"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = PytestRunner::with_command("sh", &["-c", "sleep 10"])
            .with_timeout(Some(Duration::from_millis(200)));

        let started = Instant::now();
        let result = runner.run(&invocation(None)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.ran);
        assert!(!result.passed);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, Some(EXIT_CODE_TIMEOUT));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_output_read_so_far() {
        let runner = PytestRunner::with_command(
            "sh",
            &["-c", "echo test_slow_case started; echo collecting >&2; sleep 10"],
        )
        .with_timeout(Some(Duration::from_millis(500)));

        let started = Instant::now();
        let result = runner.run(&invocation(None)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.timed_out);
        assert!(result.stdout.contains("test_slow_case started"), "{}", result.stdout);
        assert!(result.stderr.contains("timed out"), "{}", result.stderr);
        assert!(result.stderr.contains("collecting"), "{}", result.stderr);
    }
}
