//! End-to-end generation sessions driven through the public API.

use elenchus::testing::{MockRecorder, MockTestRunner, StaticPutSource};
use elenchus::{
    ExecutionResult, ExtractionConfidence, IterationController, MockLlmClient, SessionStatus,
    Settings,
};
use std::sync::Arc;
use tempfile::TempDir;

const ADD_SOURCE: &str = "def add(a: int, b: int) -> int:\n    return a + b\n";

const PASSING_RESPONSE: &str = "Here is the test file:\n\n```python\nfrom he_0 import add\n\n\ndef test_add():\n    assert add(2, 3) == 5\n```\n";

const FAILING_RESPONSE: &str = "```python\nfrom he_0 import add\n\n\ndef test_add():\n    assert add(2, 3) == 6\n```";

const UNPARSABLE_RESPONSE: &str = "```python\ndef test_add(:\n    assert add(2, 3) == 5\n```";

fn settings(temp: &TempDir, max_iterations: u32) -> Settings {
    Settings {
        output_dir: temp.path().join("generated_tests"),
        puts_dir: temp.path().join("HumanEval"),
        max_iterations,
        ..Settings::default()
    }
}

fn puts() -> Arc<StaticPutSource> {
    Arc::new(StaticPutSource::new().with_put("he_0", ADD_SOURCE))
}

#[tokio::test]
async fn test_single_passing_attempt_succeeds() {
    let temp = TempDir::new().unwrap();
    let llm = Arc::new(MockLlmClient::new().with_response(PASSING_RESPONSE));
    let controller = IterationController::new(settings(&temp, 1), llm, puts())
        .with_runner(Box::new(MockTestRunner::new()));

    let record = controller.run("he_0").await;

    assert!(record.success);
    assert_eq!(record.status, SessionStatus::Success);
    assert_eq!(record.attempts.len(), 1);
    assert!(record.syntax_ok);
    assert!(record.ran);
    assert!(record.passed);
    assert_eq!(record.returncode, Some(0));
    assert!(record.error.is_none());
    assert_eq!(record.attempts[0].confidence, ExtractionConfidence::FencedLabeled);

    let test_file = record.test_file.expect("test file");
    assert!(test_file.ends_with("tests/test_he_0.py"));
    assert!(std::fs::read_to_string(test_file)
        .unwrap()
        .contains("assert add(2, 3) == 5"));
}

#[tokio::test]
async fn test_unparsable_code_exhausts_ceiling() {
    let temp = TempDir::new().unwrap();
    let llm = Arc::new(MockLlmClient::new().with_response(UNPARSABLE_RESPONSE));
    let runner = MockTestRunner::new();
    let runs = runner.call_counter();
    let controller = IterationController::new(settings(&temp, 3), llm.clone(), puts())
        .with_runner(Box::new(runner));

    let record = controller.run("he_0").await;

    assert!(!record.success);
    assert_eq!(record.status, SessionStatus::Exhausted);
    assert_eq!(record.attempts.len(), 3);
    assert_eq!(llm.call_count(), 3);
    assert_eq!(runs.get(), 0);
    assert!(!record.syntax_ok);

    let error = record.error.expect("exhaustion error");
    assert!(error.contains("3 attempts"), "{error}");
    let last_syntax = record.attempts[2].syntax_error.as_ref().expect("syntax error");
    assert!(error.contains(&last_syntax.message), "{error}");
    assert!(record.attempts.iter().all(|a| !a.syntax_valid));
}

#[tokio::test]
async fn test_failing_then_passing_attempt() {
    let temp = TempDir::new().unwrap();
    let llm = Arc::new(
        MockLlmClient::new()
            .with_response(FAILING_RESPONSE)
            .with_response(PASSING_RESPONSE),
    );
    let runner = MockTestRunner::new()
        .with_result(ExecutionResult::completed(
            1,
            "FAILED test_he_0.py::test_add - assert 5 == 6",
            "",
        ))
        .with_result(ExecutionResult::completed(0, "1 passed", ""));
    let controller = IterationController::new(settings(&temp, 5), llm.clone(), puts())
        .with_runner(Box::new(runner));

    let record = controller.run("he_0").await;

    assert!(record.success);
    assert_eq!(record.test_iterations_needed, 2);
    assert!(!record.attempts[0].execution.passed);
    assert!(record.attempts[1].execution.passed);

    // The retry prompt carried the failing code and its output.
    let prompts = llm.prompts();
    assert!(prompts[1].contains("assert add(2, 3) == 6"));
    assert!(prompts[1].contains("assert 5 == 6"));
    assert!(prompts[1].contains("Exit code: 1"));
}

#[tokio::test]
async fn test_syntax_only_mode_skips_execution() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings(&temp, 5);
    settings.run_tests = false;
    let runner = MockTestRunner::new();
    let runs = runner.call_counter();
    let controller = IterationController::new(
        settings,
        Arc::new(MockLlmClient::new().with_response(FAILING_RESPONSE)),
        puts(),
    )
    .with_runner(Box::new(runner));

    let record = controller.run("he_0").await;

    assert!(record.success);
    assert_eq!(record.attempts.len(), 1);
    assert!(!record.ran);
    assert!(!record.passed);
    assert_eq!(record.returncode, None);
    assert_eq!(runs.get(), 0);
    assert!(record.test_file.expect("test file").is_file());
}

#[tokio::test]
async fn test_session_terminates_within_ceiling() {
    for max_iterations in 1..=4 {
        let temp = TempDir::new().unwrap();
        let llm = Arc::new(MockLlmClient::new().with_response(FAILING_RESPONSE));
        let runner =
            MockTestRunner::new().with_result(ExecutionResult::completed(1, "1 failed", ""));
        let controller =
            IterationController::new(settings(&temp, max_iterations), llm.clone(), puts())
                .with_runner(Box::new(runner));

        let record = controller.run("he_0").await;

        assert_eq!(record.status, SessionStatus::Exhausted);
        assert_eq!(record.attempts.len() as u32, max_iterations);
        assert_eq!(llm.call_count(), max_iterations);
        for (i, attempt) in record.attempts.iter().enumerate() {
            assert_eq!(attempt.iteration as usize, i + 1);
        }
    }
}

#[tokio::test]
async fn test_unfenced_response_is_still_validated() {
    let temp = TempDir::new().unwrap();
    let llm = Arc::new(
        MockLlmClient::new().with_response("from he_0 import add\n\ndef test_add():\n    assert add(1, 1) == 2\n"),
    );
    let controller = IterationController::new(settings(&temp, 1), llm, puts())
        .with_runner(Box::new(MockTestRunner::new()));

    let record = controller.run("he_0").await;

    assert!(record.success);
    assert_eq!(record.attempts[0].confidence, ExtractionConfidence::Unfenced);
}

#[tokio::test]
async fn test_exactly_one_outcome_per_put_with_recorder() {
    let temp = TempDir::new().unwrap();
    let recorder = Arc::new(MockRecorder::new());
    let puts = Arc::new(
        StaticPutSource::new()
            .with_put("he_0", ADD_SOURCE)
            .with_put("he_1", "def sub(a, b):\n    return a - b\n"),
    );
    let controller = IterationController::new(
        settings(&temp, 2),
        Arc::new(MockLlmClient::new().with_response(PASSING_RESPONSE)),
        puts,
    )
    .with_runner(Box::new(MockTestRunner::new()))
    .with_recorder(recorder.clone());

    let first = controller.run("he_0").await;
    let second = controller.run("he_1").await;
    let missing = controller.run("he_2").await;

    assert_eq!(first.put_id, "he_0");
    assert_eq!(second.put_id, "he_1");
    assert_eq!(missing.status, SessionStatus::Fatal);

    let finals = recorder
        .events()
        .into_iter()
        .filter(|e| e.starts_with("finalize"))
        .count();
    // A missing PUT never reaches the recorder.
    assert_eq!(finals, 2);
}
