//! Configuration management for Elenchus.
//!
//! Settings are resolved once per run with the precedence
//! defaults < JSON settings file < `ELENCHUS_*` environment < CLI flags,
//! validated, and then handed to every session as an immutable value.

use crate::error::{ElenchusError, Result};
use crate::feedback::{DEFAULT_STDERR_BUDGET, DEFAULT_STDOUT_BUDGET};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file name, looked up in the working directory.
pub const SETTINGS_FILE: &str = "elenchus.json";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ELENCHUS_";

/// Model providers understood by [`crate::llm::create_llm_client`].
pub const PROVIDERS: &[&str] = &["ollama", "claude", "command"];

/// Language model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider adapter: "ollama", "claude" or "command".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for a single model call, in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// API key. Never written back to disk.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Program and arguments for the "command" provider.
    /// The prompt is written to the program's stdin.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout() -> u64 {
    30
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            api_key: None,
            base_url: None,
            command: None,
        }
    }
}

impl LlmSettings {
    /// Timeout applied to each model call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Settings snapshot handed to the experiment recorder.
    ///
    /// Secrets are excluded.
    #[must_use]
    pub fn recorder_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "llm_provider": self.provider,
            "llm_model": self.model,
            "llm_temperature": self.temperature,
            "llm_max_tokens": self.max_tokens,
            "llm_timeout": self.timeout_secs,
        })
    }
}

/// Top-level settings for a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the programs under test (`{put_id}.py`).
    #[serde(default = "default_puts_dir")]
    pub puts_dir: PathBuf,

    /// Root for every artifact a run produces.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Iteration ceiling per session.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Execute syntactically valid candidates.
    #[serde(default = "default_true")]
    pub run_tests: bool,

    /// Request a Cobertura coverage report from the test runner.
    #[serde(default)]
    pub coverage: bool,

    /// Wall-clock bound on one test run, in seconds. 0 disables the bound.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Prompt technique identifier reported to the recorder.
    #[serde(default = "default_technique")]
    pub technique_id: String,

    /// Emit experiment events.
    #[serde(default = "default_true")]
    pub record_experiments: bool,

    /// Python interpreter used to launch pytest and to check syntax.
    #[serde(default = "default_python")]
    pub python: String,

    /// Extra requirement lines added to every generation prompt.
    #[serde(default)]
    pub prompt_requirements: Vec<String>,

    /// Characters of test stdout quoted in feedback.
    #[serde(default = "default_feedback_stdout_chars")]
    pub feedback_stdout_chars: usize,

    /// Characters of test stderr quoted in feedback.
    #[serde(default = "default_feedback_stderr_chars")]
    pub feedback_stderr_chars: usize,

    #[serde(default)]
    pub llm: LlmSettings,
}

fn default_puts_dir() -> PathBuf {
    PathBuf::from("HumanEval")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated_tests")
}

fn default_max_iterations() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_test_timeout() -> u64 {
    120
}

fn default_technique() -> String {
    "baseline".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_feedback_stdout_chars() -> usize {
    DEFAULT_STDOUT_BUDGET
}

fn default_feedback_stderr_chars() -> usize {
    DEFAULT_STDERR_BUDGET
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            puts_dir: default_puts_dir(),
            output_dir: default_output_dir(),
            max_iterations: default_max_iterations(),
            run_tests: true,
            coverage: false,
            test_timeout_secs: default_test_timeout(),
            technique_id: default_technique(),
            record_experiments: true,
            python: default_python(),
            prompt_requirements: Vec::new(),
            feedback_stdout_chars: DEFAULT_STDOUT_BUDGET,
            feedback_stderr_chars: DEFAULT_STDERR_BUDGET,
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ElenchusError::config_with_path(format!("cannot read settings: {e}"), path.into())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ElenchusError::config_with_path(format!("invalid settings JSON: {e}"), path.into())
        })
    }

    /// Apply `ELENCHUS_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `ELENCHUS_*` overrides using the given variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("PUTS_DIR") {
            self.puts_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MAX_ITERATIONS") {
            self.max_iterations = parse_env("MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("TEST_TIMEOUT") {
            self.test_timeout_secs = parse_env("TEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("TECHNIQUE_ID") {
            self.technique_id = v;
        }
        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = v.to_lowercase();
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("LLM_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_env("LLM_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("LLM_TIMEOUT") {
            self.llm.timeout_secs = parse_env("LLM_TIMEOUT", &v)?;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }

        Ok(())
    }

    /// Validate the resolved settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ElenchusError::invalid_config(
                "max_iterations",
                "must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ElenchusError::invalid_config(
                "llm.temperature",
                format!("{} is outside 0.0-2.0", self.llm.temperature),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(ElenchusError::invalid_config(
                "llm.max_tokens",
                "must be positive",
            ));
        }
        if !PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(ElenchusError::invalid_config(
                "llm.provider",
                format!(
                    "unknown provider '{}'. Valid options: {}",
                    self.llm.provider,
                    PROVIDERS.join(", ")
                ),
            ));
        }
        if self.llm.provider == "command"
            && self.llm.command.as_ref().is_none_or(|c| c.is_empty())
        {
            return Err(ElenchusError::invalid_config(
                "llm.command",
                "provider 'command' requires a program to run",
            ));
        }
        if self.python.trim().is_empty() {
            return Err(ElenchusError::invalid_config("python", "cannot be empty"));
        }
        if self.technique_id.trim().is_empty() {
            return Err(ElenchusError::invalid_config(
                "technique_id",
                "cannot be empty",
            ));
        }
        Ok(())
    }

    /// Test execution bound, if any.
    #[must_use]
    pub fn test_timeout(&self) -> Option<Duration> {
        (self.test_timeout_secs > 0).then(|| Duration::from_secs(self.test_timeout_secs))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ElenchusError::invalid_config(
            format!("{ENV_PREFIX}{name}"),
            format!("cannot parse '{value}'"),
        )
    })
}
