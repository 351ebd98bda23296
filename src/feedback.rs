//! Remediation text for the next prompt.
//!
//! Feedback is derived from exactly one failed attempt. Output excerpts are
//! bounded so prompts do not grow across iterations.

use crate::execution::ExecutionResult;
use crate::extract::ExtractionConfidence;
use crate::syntax::SyntaxError;

/// Default character budget for the stdout excerpt.
pub const DEFAULT_STDOUT_BUDGET: usize = 3000;

/// Default character budget for the stderr excerpt.
pub const DEFAULT_STDERR_BUDGET: usize = 1000;

/// Marker appended to an excerpt that was cut short.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Builds feedback text from syntax and execution failures.
#[derive(Debug, Clone)]
pub struct FeedbackSynthesizer {
    stdout_budget: usize,
    stderr_budget: usize,
}

impl Default for FeedbackSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackSynthesizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout_budget: DEFAULT_STDOUT_BUDGET,
            stderr_budget: DEFAULT_STDERR_BUDGET,
        }
    }

    /// Override the stdout excerpt budget (in characters).
    #[must_use]
    pub fn with_stdout_budget(mut self, chars: usize) -> Self {
        self.stdout_budget = chars;
        self
    }

    /// Override the stderr excerpt budget (in characters).
    #[must_use]
    pub fn with_stderr_budget(mut self, chars: usize) -> Self {
        self.stderr_budget = chars;
        self
    }

    /// Feedback for a candidate that did not parse.
    #[must_use]
    pub fn syntax_failure(
        &self,
        put_id: &str,
        confidence: ExtractionConfidence,
        error: Option<&SyntaxError>,
    ) -> String {
        let mut text = String::from("The previous test code is not valid Python.\n\n");

        text.push_str(&format!("- Extraction: {}", confidence));
        if confidence == ExtractionConfidence::Unfenced {
            text.push_str(" (no fenced code block was found; the whole response was treated as code)");
        }
        text.push('\n');

        match error {
            Some(e) => text.push_str(&format!(
                "- Syntax error at line {}, column {}: {}\n",
                e.line, e.column, e.message
            )),
            None => text.push_str("- Syntax error: location unknown\n"),
        }

        text.push_str(&format!(
            "\nReturn the complete corrected test module in a single ```python code block. \
             Keep the import of the unit under test exactly as `from {put_id} import ...`.\n"
        ));
        text
    }

    /// Feedback for a candidate whose test run failed.
    #[must_use]
    pub fn execution_failure(&self, result: &ExecutionResult) -> String {
        let mut text = String::new();

        if result.timed_out {
            text.push_str("The previous tests did not finish in time and were terminated.\n");
            text.push_str("Avoid infinite loops, sleeps, network access and very large inputs.\n\n");
        } else {
            text.push_str("The previous tests failed when run with pytest.\n\n");
        }

        let code = result
            .exit_code
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        text.push_str(&format!("Exit code: {code}\n"));

        let stdout = result.stdout.trim();
        if !stdout.is_empty() {
            text.push_str("\nTest output:\n```\n");
            text.push_str(&excerpt(stdout, self.stdout_budget));
            text.push_str("\n```\n");
        }

        let stderr = result.stderr.trim();
        if !stderr.is_empty() {
            text.push_str("\nErrors:\n```\n");
            text.push_str(&excerpt(stderr, self.stderr_budget));
            text.push_str("\n```\n");
        }

        text.push_str(
            "\nFix the failing tests. Assertions must match the actual behavior of the \
             program under test; do not change the program itself.\n",
        );
        text
    }
}

/// Truncate `text` to at most `budget` characters, marking the cut.
#[must_use]
pub fn excerpt(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stdout: &str, stderr: &str) -> ExecutionResult {
        ExecutionResult::completed(1, stdout, stderr)
    }

    #[test]
    fn test_syntax_feedback_names_confidence_and_location() {
        let error = SyntaxError {
            message: "invalid syntax near 'def broken(:'".to_string(),
            line: 3,
            column: 1,
        };
        let text = FeedbackSynthesizer::new().syntax_failure(
            "he_0",
            ExtractionConfidence::FencedGeneric,
            Some(&error),
        );

        assert!(text.contains("fenced-generic"));
        assert!(text.contains("line 3, column 1"));
        assert!(text.contains("def broken(:"));
        assert!(text.contains("from he_0 import"));
    }

    #[test]
    fn test_syntax_feedback_explains_unfenced() {
        let text = FeedbackSynthesizer::new().syntax_failure(
            "he_1",
            ExtractionConfidence::Unfenced,
            None,
        );
        assert!(text.contains("unfenced"));
        assert!(text.contains("no fenced code block"));
    }

    #[test]
    fn test_execution_feedback_includes_exit_code_and_output() {
        let text = FeedbackSynthesizer::new()
            .execution_failure(&failed("FAILED test_he_0.py::test_add - assert 4 == 5", ""));

        assert!(text.contains("Exit code: 1"));
        assert!(text.contains("assert 4 == 5"));
        assert!(!text.contains(TRUNCATION_MARKER));
        assert!(!text.contains("Errors:"));
    }

    #[test]
    fn test_execution_feedback_truncates_stdout() {
        let stdout = "x".repeat(5000);
        let text = FeedbackSynthesizer::new().execution_failure(&failed(&stdout, ""));

        assert!(text.contains(TRUNCATION_MARKER));
        assert!(text.contains(&"x".repeat(DEFAULT_STDOUT_BUDGET)));
        assert!(!text.contains(&"x".repeat(DEFAULT_STDOUT_BUDGET + 1)));
    }

    #[test]
    fn test_execution_feedback_includes_bounded_stderr() {
        let stderr = format!("ModuleNotFoundError: No module named 'he_0'\n{}", "y".repeat(2000));
        let text = FeedbackSynthesizer::new()
            .with_stderr_budget(100)
            .execution_failure(&failed("", &stderr));

        assert!(text.contains("Errors:"));
        assert!(text.contains("ModuleNotFoundError"));
        assert!(text.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_timeout_feedback() {
        let result = ExecutionResult::timed_out(std::time::Duration::from_secs(5));
        let text = FeedbackSynthesizer::new().execution_failure(&result);
        assert!(text.contains("terminated"));
        assert!(text.contains("Exit code: 124"));
    }

    #[test]
    fn test_timeout_feedback_names_the_hanging_test() {
        let result = ExecutionResult::timed_out(std::time::Duration::from_secs(5))
            .with_partial_output("test_he_0.py::test_large_input ", "collected 3 items");
        let text = FeedbackSynthesizer::new().execution_failure(&result);

        assert!(text.contains("Test output:"));
        assert!(text.contains("test_large_input"));
        assert!(text.contains("timed out after 5 seconds"));
        assert!(text.contains("collected 3 items"));
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        assert_eq!(excerpt("héllo", 2), format!("hé{TRUNCATION_MARKER}"));
        assert_eq!(excerpt("héllo", 5), "héllo");
        assert_eq!(excerpt("", 0), "");
    }
}
