//! Test doubles for the generation loop.
//!
//! These stand in for the child-process test runner, the experiment
//! recorder and the PUT directory so the iteration loop can be driven
//! deterministically. The scripted model client lives in
//! [`crate::llm::MockLlmClient`].
//!
//! # Example
//!
//! ```rust,ignore
//! use elenchus::testing::{MockTestRunner, StaticPutSource};
//!
//! let runner = MockTestRunner::new()
//!     .with_result(ExecutionResult::completed(1, "1 failed", ""))
//!     .with_result(ExecutionResult::completed(0, "1 passed", ""));
//! let puts = StaticPutSource::new().with_put("he_0", "def add(a, b):\n    return a + b\n");
//! ```

pub mod mocks;

pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CoverageRequest, ExecutionResult, TestInvocation, TestRunner};
    use crate::put::PutSource;
    use crate::recorder::{ExperimentRecorder, ExperimentSummary};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn invocation(report: Option<PathBuf>) -> TestInvocation {
        TestInvocation {
            test_path: PathBuf::from("tests/test_he_0.py"),
            module_root: PathBuf::from("puts"),
            coverage: report.map(|report_path| CoverageRequest {
                module: "he_0".to_string(),
                report_path,
            }),
        }
    }

    // =========================================================================
    // MockTestRunner
    // =========================================================================

    #[tokio::test]
    async fn test_mock_runner_defaults_to_pass() {
        let runner = MockTestRunner::new();
        let result = runner.run(&invocation(None)).await;
        assert!(result.ran && result.passed);
    }

    #[tokio::test]
    async fn test_mock_runner_script_repeats_last() {
        let runner = MockTestRunner::new()
            .with_result(ExecutionResult::completed(1, "", ""))
            .with_result(ExecutionResult::completed(2, "", ""));
        let calls = runner.call_counter();

        assert_eq!(runner.run(&invocation(None)).await.exit_code, Some(1));
        assert_eq!(runner.run(&invocation(None)).await.exit_code, Some(2));
        assert_eq!(runner.run(&invocation(None)).await.exit_code, Some(2));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_mock_runner_writes_coverage_report() {
        let temp = TempDir::new().unwrap();
        let report = temp.path().join("cov/he_0_iter1.xml");
        let runner = MockTestRunner::new().with_coverage_report("<coverage line-rate=\"1\"/>");

        runner.run(&invocation(Some(report.clone()))).await;
        assert!(report.is_file());
    }

    // =========================================================================
    // MockRecorder
    // =========================================================================

    #[test]
    fn test_mock_recorder_captures_events() {
        let recorder = MockRecorder::new();
        let token = recorder.start("he_0", "baseline", &serde_json::json!({})).unwrap();
        recorder.record_code_generation(&token, 1, true, "", "").unwrap();
        recorder.record_test_generation(&token, 1, false, "", None).unwrap();
        recorder
            .finalize(
                &token,
                &ExperimentSummary {
                    status: "exhausted".to_string(),
                    success: false,
                    iterations: 1,
                    coverage_percent: None,
                    execution_time_secs: None,
                    error: None,
                },
            )
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec!["start he_0 baseline", "code 1 true", "test 1 false", "finalize exhausted"]
        );
    }

    #[test]
    fn test_mock_recorder_failing() {
        let recorder = MockRecorder::new().failing();
        assert!(recorder.start("he_0", "baseline", &serde_json::json!({})).is_err());
        assert!(recorder.record_code_generation("t", 1, true, "", "").is_err());
        assert!(recorder.events().is_empty());
    }

    // =========================================================================
    // StaticPutSource
    // =========================================================================

    #[test]
    fn test_static_put_source() {
        let puts = StaticPutSource::new().with_put("he_0", "x = 1\n");
        assert_eq!(puts.load("he_0").unwrap().source, "x = 1\n");

        let err = puts.load("he_1").unwrap_err();
        assert!(err.to_string().contains("PUT file not found"));
    }
}
