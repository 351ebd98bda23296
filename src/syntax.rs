//! Parse-only syntax validation of candidate Python code.
//!
//! The configured interpreter makes the decision: the candidate is piped to
//! `python -I -c` and compiled (never executed), and the first `SyntaxError`
//! is reported with CPython's own message and position. When the interpreter
//! cannot be launched the tree-sitter Python grammar is used instead, which
//! reports the first `ERROR` or `MISSING` node in document order.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

/// Maximum characters of offending source quoted in an error message.
const SNIPPET_CHARS: usize = 40;

/// Bound on one interpreter check.
const COMPILE_TIMEOUT: Duration = Duration::from_secs(15);

/// Exit status of [`COMPILE_SCRIPT`] for a candidate that does not parse.
const EXIT_SYNTAX_ERROR: i32 = 3;

/// Compiles stdin without running it. On failure prints the error as JSON
/// and exits with [`EXIT_SYNTAX_ERROR`].
const COMPILE_SCRIPT: &str = r#"import json, sys
source = sys.stdin.buffer.read()
try:
    compile(source, "<candidate>", "exec", dont_inherit=True)
except (SyntaxError, ValueError) as e:
    print(json.dumps({
        "msg": getattr(e, "msg", None) or str(e),
        "lineno": getattr(e, "lineno", None),
        "offset": getattr(e, "offset", None),
    }))
    sys.exit(3)
"#;

/// Location and description of the first syntax error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub message: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// Outcome of a syntax check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxCheck {
    pub valid: bool,
    pub error: Option<SyntaxError>,
}

impl SyntaxCheck {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            valid: false,
            error: Some(SyntaxError {
                message: message.into(),
                line,
                column,
            }),
        }
    }
}

/// Validates that candidate code parses as Python.
#[derive(Debug, Clone)]
pub struct SyntaxValidator {
    python: String,
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error report printed by [`COMPILE_SCRIPT`].
#[derive(Debug, Deserialize)]
struct CompileError {
    msg: String,
    lineno: Option<i64>,
    offset: Option<i64>,
}

impl SyntaxValidator {
    /// Validator using `python3`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_python("python3")
    }

    /// Validator using the given interpreter.
    #[must_use]
    pub fn with_python(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }

    /// Check whether `code` parses.
    pub async fn validate(&self, code: &str) -> SyntaxCheck {
        match self.compile(code).await {
            Ok(check) => check,
            Err(e) => {
                warn!(
                    "Interpreter '{}' unavailable for syntax check ({}); using grammar check",
                    self.python, e
                );
                grammar_check(code)
            }
        }
    }

    /// Ask the interpreter to compile `code`. `Err` means no verdict.
    async fn compile(&self, code: &str) -> std::io::Result<SyntaxCheck> {
        let mut child = AsyncCommand::new(&self.python)
            .args(["-I", "-c", COMPILE_SCRIPT])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
            // Dropping stdin closes it so the script sees EOF.
        }

        let output = tokio::time::timeout(COMPILE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "syntax check timed out")
            })??;

        match output.status.code() {
            Some(0) => Ok(SyntaxCheck::ok()),
            Some(EXIT_SYNTAX_ERROR) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let report: CompileError = serde_json::from_str(stdout.trim())
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                debug!("Interpreter rejected candidate: {:?}", report);
                Ok(SyntaxCheck::invalid(
                    report.msg,
                    position(report.lineno),
                    position(report.offset),
                ))
            }
            status => Err(std::io::Error::other(format!(
                "unexpected exit {:?}: {}",
                status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// 1-based position from an optional CPython line or offset.
fn position(value: Option<i64>) -> u32 {
    value
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
}

/// Parse `code` with the tree-sitter Python grammar.
///
/// Faster than [`SyntaxValidator::validate`] but more permissive: the grammar
/// tolerates some input CPython rejects (Python 2 `print` statements,
/// inconsistent dedents).
#[must_use]
pub fn grammar_check(code: &str) -> SyntaxCheck {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        return SyntaxCheck::invalid(format!("Python grammar unavailable: {e}"), 1, 1);
    }

    let Some(tree) = parser.parse(code, None) else {
        return SyntaxCheck::invalid("parser produced no syntax tree", 1, 1);
    };

    let root = tree.root_node();
    if !root.has_error() {
        return SyntaxCheck::ok();
    }

    match first_error(root) {
        Some(node) => describe(node, code),
        // has_error() without a located node; report at the root.
        None => SyntaxCheck::invalid("invalid syntax", 1, 1),
    }
}

/// Pre-order search for the first ERROR or MISSING node.
fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    for i in 0..node.child_count() {
        if let Some(found) = node.child(i).and_then(first_error) {
            return Some(found);
        }
    }
    None
}

fn describe(node: Node<'_>, code: &str) -> SyntaxCheck {
    let pos = node.start_position();
    let line = u32::try_from(pos.row).unwrap_or(u32::MAX).saturating_add(1);
    let column = u32::try_from(pos.column).unwrap_or(u32::MAX).saturating_add(1);

    let message = if node.is_missing() {
        format!("missing '{}'", node.kind())
    } else {
        let snippet: String = node
            .utf8_text(code.as_bytes())
            .unwrap_or_default()
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .chars()
            .take(SNIPPET_CHARS)
            .collect();
        if snippet.is_empty() {
            "invalid syntax".to_string()
        } else {
            format!("invalid syntax near '{snippet}'")
        }
    };

    SyntaxCheck::invalid(message, line, column)
}
