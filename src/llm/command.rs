//! Model client that pipes the prompt through a local CLI.
//!
//! Covers `ollama run <model>`, `claude -p`, and any user-supplied command
//! that reads a prompt on stdin and prints the completion on stdout.

use super::LlmClient;
use crate::config::LlmSettings;
use crate::error::{ElenchusError, Result as ElenchusResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Characters of stderr quoted in a failure message.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Client that spawns one process per prompt.
#[derive(Debug, Clone)]
pub struct CommandLlmClient {
    program: String,
    args: Vec<String>,
    model: String,
    timeout: Option<Duration>,
    /// Extra environment handed to the child (generation parameters, key).
    env: Vec<(String, String)>,
}

impl CommandLlmClient {
    /// `ollama run <model>`.
    #[must_use]
    pub fn ollama(model: &str) -> Self {
        Self {
            program: "ollama".to_string(),
            args: vec!["run".to_string(), model.to_string()],
            model: model.to_string(),
            timeout: None,
            env: Vec::new(),
        }
    }

    /// `claude -p --model <model> --output-format text`.
    #[must_use]
    pub fn claude(model: &str) -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--model".to_string(),
                model.to_string(),
                "--output-format".to_string(),
                "text".to_string(),
            ],
            model: model.to_string(),
            timeout: None,
            env: Vec::new(),
        }
    }

    /// Arbitrary command line; the first element is the program.
    pub fn from_argv(model: &str, argv: &[String]) -> ElenchusResult<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            ElenchusError::invalid_config("llm.command", "command line is empty")
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            model: model.to_string(),
            timeout: None,
            env: Vec::new(),
        })
    }

    /// Bound each call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply timeout and expose generation parameters to the child as
    /// `ELENCHUS_LLM_*` variables.
    #[must_use]
    pub fn with_settings(mut self, settings: &LlmSettings) -> Self {
        if settings.timeout_secs > 0 {
            self.timeout = Some(settings.timeout());
        }
        self.env = vec![
            ("ELENCHUS_LLM_MODEL".to_string(), settings.model.clone()),
            (
                "ELENCHUS_LLM_TEMPERATURE".to_string(),
                settings.temperature.to_string(),
            ),
            (
                "ELENCHUS_LLM_MAX_TOKENS".to_string(),
                settings.max_tokens.to_string(),
            ),
        ];
        if let Some(url) = &settings.base_url {
            self.env.push(("ELENCHUS_LLM_BASE_URL".to_string(), url.clone()));
        }
        if let Some(key) = &settings.api_key {
            self.env.push(("ELENCHUS_LLM_API_KEY".to_string(), key.clone()));
        }
        self
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let mut child = AsyncCommand::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading closes the pipe early; its
            // exit status is the meaningful outcome.
            let written = match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!("Writing prompt to {} failed: {}", self.program, e);
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(STDERR_EXCERPT_CHARS)
                .collect();
            anyhow::bail!(
                "'{}' exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr
            )
        }
    }
}

#[async_trait]
impl LlmClient for CommandLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(
            "Running {} for model {} ({} chars prompt)",
            self.program,
            self.model,
            prompt.len()
        );

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.invoke(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ElenchusError::LlmTimeout {
                    timeout_secs: limit.as_secs(),
                }
                .into()),
            },
            None => self.invoke(prompt).await,
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
