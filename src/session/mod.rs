//! Generation session data model.
//!
//! A [`GenerationSession`] covers one program under test from the first
//! prompt to the final [`OutcomeRecord`]. It is mutated only by the
//! [`IterationController`] and discarded once the record is produced.
//!
//! ```text
//! PROMPTING -> EXTRACTING -> SYNTAX_CHECK -+- invalid -> FEEDBACK -> PROMPTING
//!                                          +- valid -> EXECUTING -+- passed -> SUCCESS
//!                                                                 +- failed -> FEEDBACK
//! FEEDBACK at the iteration ceiling -> EXHAUSTED
//! PUT lookup or model call failure   -> FATAL
//! ```

pub mod controller;

pub use controller::IterationController;

use crate::execution::ExecutionResult;
use crate::extract::ExtractionConfidence;
use crate::syntax::SyntaxError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Exhausted,
    Fatal,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Success => write!(f, "success"),
            SessionStatus::Exhausted => write!(f, "exhausted"),
            SessionStatus::Fatal => write!(f, "fatal"),
        }
    }
}

/// Position of a session in the iteration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Prompting,
    Extracting,
    SyntaxCheck,
    Executing,
    Feedback,
    Success,
    Exhausted,
    Fatal,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Exhausted | Self::Fatal)
    }

    /// Terminal status for a terminal state.
    #[must_use]
    pub fn status(&self) -> Option<SessionStatus> {
        match self {
            Self::Success => Some(SessionStatus::Success),
            Self::Exhausted => Some(SessionStatus::Exhausted),
            Self::Fatal => Some(SessionStatus::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Prompting => "PROMPTING",
            Self::Extracting => "EXTRACTING",
            Self::SyntaxCheck => "SYNTAX_CHECK",
            Self::Executing => "EXECUTING",
            Self::Feedback => "FEEDBACK",
            Self::Success => "SUCCESS",
            Self::Exhausted => "EXHAUSTED",
            Self::Fatal => "FATAL",
        };
        write!(f, "{name}")
    }
}

/// One pass through generation, extraction, validation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based.
    pub iteration: u32,
    pub prompt: String,
    pub raw_response: String,
    pub code: String,
    pub confidence: ExtractionConfidence,
    pub syntax_valid: bool,
    pub syntax_error: Option<SyntaxError>,
    pub execution: ExecutionResult,
    /// Only set when this attempt passed execution.
    pub coverage_percent: Option<f64>,
    pub coverage_xml: Option<PathBuf>,
    pub log_file: PathBuf,
    /// Feedback derived from this attempt, if it failed.
    pub feedback: Option<String>,
}

impl Attempt {
    /// Whether this attempt ends the session successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.syntax_valid && (!self.execution.ran || self.execution.passed)
    }

    /// Short description of why this attempt failed.
    #[must_use]
    pub fn failure_cause(&self) -> Option<String> {
        if !self.syntax_valid {
            return Some(match &self.syntax_error {
                Some(e) => format!("syntax error at {e}"),
                None => "syntax error".to_string(),
            });
        }
        if self.execution.ran && !self.execution.passed {
            if self.execution.timed_out {
                return Some("test execution timed out".to_string());
            }
            return Some(match self.execution.exit_code {
                Some(code) => format!("tests failed with exit code {code}"),
                None => "tests failed".to_string(),
            });
        }
        None
    }
}

/// State of one PUT's generation from first prompt to outcome.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    put_id: String,
    max_iterations: u32,
    attempts: Vec<Attempt>,
    state: SessionState,
    error: Option<String>,
    test_file: Option<PathBuf>,
}

impl GenerationSession {
    pub fn new(put_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            put_id: put_id.into(),
            max_iterations,
            attempts: Vec::new(),
            state: SessionState::Prompting,
            error: None,
            test_file: None,
        }
    }

    #[must_use]
    pub fn put_id(&self) -> &str {
        &self.put_id
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    #[must_use]
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    #[must_use]
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> Option<SessionStatus> {
        self.state.status()
    }

    /// Iteration number of the next attempt.
    #[must_use]
    pub fn next_iteration(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// Whether another attempt fits under the ceiling.
    #[must_use]
    pub fn has_budget(&self) -> bool {
        !self.state.is_terminal() && self.next_iteration() <= self.max_iterations
    }

    /// Move to `next`. Terminal states are final.
    pub fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            debug!("{}: ignoring {} after terminal {}", self.put_id, next, self.state);
            return;
        }
        debug!("{}: {} -> {}", self.put_id, self.state, next);
        self.state = next;
    }

    pub fn push_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn set_test_file(&mut self, path: PathBuf) {
        self.test_file = Some(path);
    }

    /// End the session as fatal.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(SessionState::Fatal);
    }

    /// End the session as exhausted, naming the ceiling and last cause.
    pub fn exhaust(&mut self) {
        let cause = self
            .last_attempt()
            .and_then(Attempt::failure_cause)
            .unwrap_or_else(|| "no attempt succeeded".to_string());
        self.error = Some(format!(
            "Failed to generate valid tests after {} attempts. Last error: {}",
            self.attempts.len(),
            cause
        ));
        self.transition(SessionState::Exhausted);
    }

    pub fn succeed(&mut self) {
        self.transition(SessionState::Success);
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Produce the externally visible record, consuming the session.
    #[must_use]
    pub fn into_outcome(self) -> OutcomeRecord {
        let status = self.state.status().unwrap_or(SessionStatus::Fatal);
        let success = status == SessionStatus::Success;
        let last = self.attempts.last();
        let execution = last.map(|a| a.execution.clone()).unwrap_or_else(ExecutionResult::skipped);

        OutcomeRecord {
            put_id: self.put_id,
            prompt: last.map(|a| a.prompt.clone()).unwrap_or_default(),
            response: last.map(|a| a.raw_response.clone()).unwrap_or_default(),
            log_file: last.map(|a| a.log_file.clone()),
            test_file: self.test_file,
            syntax_ok: last.is_some_and(|a| a.syntax_valid),
            ran: execution.ran,
            passed: execution.passed,
            returncode: execution.exit_code,
            run_stdout: execution.stdout,
            run_stderr: execution.stderr,
            success,
            error: if success { None } else { self.error },
            coverage_percent: last.and_then(|a| a.coverage_percent),
            coverage_xml: last.and_then(|a| a.coverage_xml.clone()),
            status,
            test_iterations_needed: u32::try_from(self.attempts.len()).unwrap_or(u32::MAX),
            execution_time_secs: execution.ran.then_some(execution.duration_secs),
            attempts: self.attempts,
        }
    }
}

/// Final externally visible result of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub put_id: String,
    /// Prompt of the last attempt.
    pub prompt: String,
    /// Raw response of the last attempt.
    pub response: String,
    pub log_file: Option<PathBuf>,
    pub test_file: Option<PathBuf>,
    pub syntax_ok: bool,
    pub ran: bool,
    pub passed: bool,
    pub returncode: Option<i32>,
    pub run_stdout: String,
    pub run_stderr: String,
    pub success: bool,
    pub error: Option<String>,
    pub coverage_percent: Option<f64>,
    pub coverage_xml: Option<PathBuf>,
    pub status: SessionStatus,
    /// Attempts made before the session ended.
    pub test_iterations_needed: u32,
    pub execution_time_secs: Option<f64>,
    pub attempts: Vec<Attempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(iteration: u32, syntax_valid: bool, execution: ExecutionResult) -> Attempt {
        Attempt {
            iteration,
            prompt: format!("prompt {iteration}"),
            raw_response: format!("response {iteration}"),
            code: "assert True".to_string(),
            confidence: ExtractionConfidence::FencedLabeled,
            syntax_valid,
            syntax_error: (!syntax_valid).then(|| SyntaxError {
                message: "invalid syntax".to_string(),
                line: 1,
                column: 5,
            }),
            execution,
            coverage_percent: None,
            coverage_xml: None,
            log_file: PathBuf::from(format!("logs/put_he_0_iter{iteration}.log")),
            feedback: None,
        }
    }

    #[test]
    fn test_attempt_success_rule() {
        assert!(attempt(1, true, ExecutionResult::skipped()).succeeded());
        assert!(attempt(1, true, ExecutionResult::completed(0, "", "")).succeeded());
        assert!(!attempt(1, true, ExecutionResult::completed(1, "", "")).succeeded());
        assert!(!attempt(1, false, ExecutionResult::skipped()).succeeded());
    }

    #[test]
    fn test_failure_causes() {
        let syntax = attempt(1, false, ExecutionResult::skipped());
        assert_eq!(
            syntax.failure_cause().as_deref(),
            Some("syntax error at line 1, column 5: invalid syntax")
        );

        let failed = attempt(1, true, ExecutionResult::completed(2, "", ""));
        assert_eq!(failed.failure_cause().as_deref(), Some("tests failed with exit code 2"));

        assert!(attempt(1, true, ExecutionResult::skipped()).failure_cause().is_none());
    }

    #[test]
    fn test_budget_and_iterations() {
        let mut session = GenerationSession::new("he_0", 2);
        assert_eq!(session.next_iteration(), 1);
        assert!(session.has_budget());

        session.push_attempt(attempt(1, false, ExecutionResult::skipped()));
        session.push_attempt(attempt(2, false, ExecutionResult::skipped()));
        assert_eq!(session.next_iteration(), 3);
        assert!(!session.has_budget());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut session = GenerationSession::new("he_0", 1);
        session.succeed();
        session.transition(SessionState::Prompting);
        session.fail("late");
        assert_eq!(session.state(), SessionState::Success);
        assert_eq!(session.status(), Some(SessionStatus::Success));
    }

    #[test]
    fn test_exhaust_names_count_and_cause() {
        let mut session = GenerationSession::new("he_0", 3);
        for i in 1..=3 {
            session.push_attempt(attempt(i, false, ExecutionResult::skipped()));
        }
        session.exhaust();

        let error = session.error().unwrap();
        assert!(error.contains("3 attempts"));
        assert!(error.contains("invalid syntax"));
    }

    #[test]
    fn test_outcome_from_successful_session() {
        let mut session = GenerationSession::new("he_0", 1);
        session.set_test_file(PathBuf::from("tests/test_he_0.py"));
        let mut passed = attempt(1, true, ExecutionResult::completed(0, "1 passed", ""));
        passed.coverage_percent = Some(100.0);
        session.push_attempt(passed);
        session.succeed();

        let record = session.into_outcome();
        assert!(record.success);
        assert_eq!(record.status, SessionStatus::Success);
        assert!(record.syntax_ok && record.ran && record.passed);
        assert_eq!(record.returncode, Some(0));
        assert_eq!(record.test_iterations_needed, 1);
        assert_eq!(record.coverage_percent, Some(100.0));
        assert_eq!(record.test_file, Some(PathBuf::from("tests/test_he_0.py")));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_outcome_from_fatal_session_without_attempts() {
        let mut session = GenerationSession::new("he_9", 5);
        session.fail("PUT file not found: HumanEval/he_9.py");

        let record = session.into_outcome();
        assert!(!record.success);
        assert_eq!(record.status, SessionStatus::Fatal);
        assert!(record.attempts.is_empty());
        assert!(record.test_file.is_none());
        assert!(record.error.unwrap().contains("PUT file not found"));
    }

    #[test]
    fn test_outcome_serializes_status_lowercase() {
        let mut session = GenerationSession::new("he_0", 1);
        session.fail("boom");
        let json = serde_json::to_value(session.into_outcome()).unwrap();
        assert_eq!(json["status"], "fatal");
        assert_eq!(json["success"], false);
        assert!(json["coverage_percent"].is_null());
    }
}
