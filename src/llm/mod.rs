//! Language model client abstraction.
//!
//! The generation loop only needs `complete(prompt) -> text`. Provider
//! wrapping (process spawning, timeouts, auth) lives behind [`LlmClient`]
//! so the loop never depends on a particular backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use elenchus::llm::{LlmClient, MockLlmClient};
//!
//! let client = MockLlmClient::new().with_response("```python\nassert True\n```");
//! let text = client.complete("Write tests").await?;
//! ```

pub mod command;

pub use command::CommandLlmClient;

use crate::config::LlmSettings;
use crate::error::{ElenchusError, Result as ElenchusResult};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A language model that turns a prompt into text.
///
/// Implementations must be `Send + Sync` so a single client can be shared
/// across sessions behind an `Arc`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a prompt and return the raw response text.
    ///
    /// # Errors
    ///
    /// Any provider, network, or timeout failure. Callers treat every error
    /// as fatal for the session.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier for logs and experiment records.
    fn model_name(&self) -> &str;
}

/// Create the client selected by `settings.provider`.
///
/// # Errors
///
/// Returns an error for an unknown provider, or for provider `command`
/// without a configured command line.
pub fn create_llm_client(settings: &LlmSettings) -> ElenchusResult<Box<dyn LlmClient>> {
    let client = match settings.provider.as_str() {
        "ollama" => CommandLlmClient::ollama(&settings.model),
        "claude" => CommandLlmClient::claude(&settings.model),
        "command" => {
            let argv = settings
                .command
                .as_deref()
                .filter(|argv| !argv.is_empty())
                .ok_or_else(|| {
                    ElenchusError::invalid_config(
                        "llm.command",
                        "provider 'command' requires a command line",
                    )
                })?;
            CommandLlmClient::from_argv(&settings.model, argv)?
        }
        other => {
            return Err(ElenchusError::invalid_config(
                "llm.provider",
                format!("unknown provider '{other}'"),
            ))
        }
    };

    Ok(Box::new(client.with_settings(settings)))
}

// =============================================================================
// Mock client
// =============================================================================

/// Scripted client for tests.
///
/// Responses are returned in order; the last one repeats once the script
/// runs out. Every prompt is captured for later inspection.
#[derive(Debug)]
pub struct MockLlmClient {
    responses: Vec<String>,
    error: Option<String>,
    model: String,
    call_count: AtomicU32,
    fail_count: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            responses: Vec::new(),
            error: None,
            model: "mock-llm".to_string(),
            call_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response to the script.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.responses.push(response.to_string());
        self
    }

    /// Configure every call to fail.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Fail the first `count` calls, then follow the script.
    #[must_use]
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = AtomicU32::new(count);
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) as usize;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if self.fail_count.load(Ordering::SeqCst) > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("Mock failure");
        }

        if let Some(ref error) = self.error {
            anyhow::bail!("{}", error);
        }

        let response = self
            .responses
            .get(call)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
