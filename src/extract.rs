//! Candidate code extraction from raw model output.
//!
//! Precedence: a fenced block labelled as Python, then any fenced block,
//! then the whole response. Extraction never fails; a missing fence is
//! reported through [`Extraction::found`] and the confidence level.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Fence labelled `python`, `py` or `python3`, any case.
static LABELED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(?i:python3?|py)[ \t]*\r?\n(.*?)```")
        .expect("labeled fence pattern compiles")
});

/// Any fence, with or without an info string.
static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)```").expect("generic fence pattern compiles")
});

/// How the candidate was located in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionConfidence {
    /// Fenced block labelled with the target language.
    FencedLabeled,
    /// Fenced block without (or with another) label.
    FencedGeneric,
    /// No fence; the whole response was taken as code.
    Unfenced,
}

impl ExtractionConfidence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FencedLabeled => "fenced-labeled",
            Self::FencedGeneric => "fenced-generic",
            Self::Unfenced => "unfenced",
        }
    }
}

impl std::fmt::Display for ExtractionConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of extracting candidate code from a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Whether a fenced block was found.
    pub found: bool,
    /// Extracted code. Fenced blocks are trimmed; unfenced code keeps its
    /// first-line indentation.
    pub code: String,
    pub confidence: ExtractionConfidence,
}

/// Isolates a candidate code block from model output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseExtractor;

impl ResponseExtractor {
    /// Create an extractor for Python fences (`python`, `py`, `python3`).
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Extract the candidate code from a raw response.
    #[must_use]
    pub fn extract(&self, response: &str) -> Extraction {
        if let Some(code) = first_capture(&LABELED_FENCE, response) {
            return Extraction {
                found: true,
                code,
                confidence: ExtractionConfidence::FencedLabeled,
            };
        }

        if let Some(code) = first_capture(&ANY_FENCE, response) {
            return Extraction {
                found: true,
                code,
                confidence: ExtractionConfidence::FencedGeneric,
            };
        }

        Extraction {
            found: false,
            code: unfenced(response).to_string(),
            confidence: ExtractionConfidence::Unfenced,
        }
    }
}

/// The whole response minus leading blank lines and trailing whitespace.
/// Indentation on the first code line is kept.
fn unfenced(response: &str) -> &str {
    let mut rest = response.trim_end();
    while let Some((line, tail)) = rest.split_once('\n') {
        if !line.trim().is_empty() {
            break;
        }
        rest = tail;
    }
    rest
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
