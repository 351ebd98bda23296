//! Elenchus - LLM-driven unit test generation
//!
//! Generates pytest suites for small Python programs ("programs under test")
//! by prompting a language model, validating the returned code, running it,
//! and feeding failures back into the next prompt.
//!
//! # Architecture
//!
//! - [`prompt`] - Prompt construction from PUT source and prior attempt
//! - [`extract`] - Candidate code extraction from model output
//! - [`syntax`] - Parse-only Python syntax validation
//! - [`execution`] - Persisting and running candidates under pytest
//! - [`coverage`] - Cobertura coverage report parsing
//! - [`feedback`] - Remediation text for the next prompt
//! - [`session`] - Session data model and the iteration controller
//! - [`recorder`] - Experiment event recording
//! - [`llm`] - Language model client abstraction
//! - [`config`] - Settings loading and validation
//! - [`testing`] - Test doubles for the loop's collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use elenchus::{IterationController, Settings};
//!
//! let mut settings = Settings::load(Path::new("elenchus.json"))?;
//! settings.apply_env()?;
//! let controller = IterationController::from_settings(settings)?;
//!
//! let record = controller.run("he_0").await;
//! println!("{} -> {}", record.put_id, record.status);
//! ```

pub mod artifacts;
pub mod config;
pub mod coverage;
pub mod error;
pub mod execution;
pub mod extract;
pub mod feedback;
pub mod llm;
pub mod prompt;
pub mod put;
pub mod recorder;
pub mod session;
pub mod syntax;
pub mod testing;

pub use error::{ElenchusError, Result};

pub use config::{LlmSettings, Settings};

pub use artifacts::ArtifactLayout;
pub use coverage::{parse_cobertura, parse_cobertura_str};
pub use execution::{ExecutionResult, PytestRunner, TestExecutor, TestRunner};
pub use extract::{Extraction, ExtractionConfidence, ResponseExtractor};
pub use feedback::FeedbackSynthesizer;
pub use prompt::PromptBuilder;
pub use put::{list_put_ids, DirectoryPutSource, ProgramUnderTest, PutSource};
pub use syntax::{grammar_check, SyntaxCheck, SyntaxError, SyntaxValidator};

pub use session::{
    Attempt, GenerationSession, IterationController, OutcomeRecord, SessionState, SessionStatus,
};

pub use llm::{create_llm_client, CommandLlmClient, LlmClient, MockLlmClient};
pub use recorder::{ExperimentRecorder, ExperimentSummary, JsonlRecorder, NoopRecorder};
