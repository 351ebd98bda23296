//! Bounded generate, validate, execute, feedback loop for one PUT.

use super::{Attempt, GenerationSession, OutcomeRecord, SessionState};
use crate::artifacts::ArtifactLayout;
use crate::config::Settings;
use crate::coverage::parse_cobertura;
use crate::error::{ElenchusError, Result};
use crate::execution::{
    ExecutionRequest, ExecutionResult, PytestRunner, TestExecutor, TestRunner,
};
use crate::extract::ResponseExtractor;
use crate::feedback::FeedbackSynthesizer;
use crate::llm::{create_llm_client, LlmClient};
use crate::prompt::PromptBuilder;
use crate::put::{DirectoryPutSource, ProgramUnderTest, PutSource};
use crate::recorder::{ExperimentRecorder, ExperimentSummary, JsonlRecorder, NoopRecorder};
use crate::syntax::SyntaxValidator;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives one [`GenerationSession`] per PUT through the iteration loop.
///
/// Recoverable failures (no fence, invalid syntax, failing tests) become
/// feedback for the next prompt. PUT lookup, model call and artifact write
/// failures end the session as fatal. Callers observe both only through the
/// returned [`OutcomeRecord`].
pub struct IterationController {
    settings: Settings,
    llm: Arc<dyn LlmClient>,
    puts: Arc<dyn PutSource>,
    recorder: Arc<dyn ExperimentRecorder>,
    executor: TestExecutor,
    layout: ArtifactLayout,
    prompts: PromptBuilder,
    extractor: ResponseExtractor,
    validator: SyntaxValidator,
    feedback: FeedbackSynthesizer,
}

impl IterationController {
    /// Controller with a pytest runner built from `settings` and no recorder.
    pub fn new(settings: Settings, llm: Arc<dyn LlmClient>, puts: Arc<dyn PutSource>) -> Self {
        let layout = ArtifactLayout::new(settings.output_dir.clone());
        let runner = PytestRunner::with_python(&settings.python).with_timeout(settings.test_timeout());
        let feedback = FeedbackSynthesizer::new()
            .with_stdout_budget(settings.feedback_stdout_chars)
            .with_stderr_budget(settings.feedback_stderr_chars);
        Self {
            executor: TestExecutor::new(Box::new(runner), layout.clone()),
            layout,
            prompts: PromptBuilder::from_settings(&settings),
            validator: SyntaxValidator::with_python(&settings.python),
            feedback,
            settings,
            llm,
            puts,
            recorder: Arc::new(NoopRecorder),
            extractor: ResponseExtractor::new(),
        }
    }

    /// Controller wired entirely from settings: provider client, PUT
    /// directory and, when enabled, the JSONL experiment recorder.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let llm: Arc<dyn LlmClient> = Arc::from(create_llm_client(&settings.llm)?);
        let puts = Arc::new(DirectoryPutSource::new(settings.puts_dir.clone()));
        let record = settings.record_experiments;
        let mut controller = Self::new(settings, llm, puts);
        if record {
            let recorder = JsonlRecorder::new(controller.layout.experiments_file());
            controller = controller.with_recorder(Arc::new(recorder));
        }
        Ok(controller)
    }

    /// Replace the test runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn TestRunner>) -> Self {
        self.executor = TestExecutor::new(runner, self.layout.clone());
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn ExperimentRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run a full session for `put_id`. Always returns exactly one record.
    pub async fn run(&self, put_id: &str) -> OutcomeRecord {
        info!(
            "[{}] Processing PUT: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            put_id
        );
        let mut session = GenerationSession::new(put_id, self.settings.max_iterations);

        let put = match self.puts.load(put_id) {
            Ok(put) => put,
            Err(e) => {
                warn!("{}: {}", put_id, e);
                session.fail(e.to_string());
                return session.into_outcome();
            }
        };

        let token = self.recorder_start(put_id);

        while session.has_budget() {
            if let Err(e) = self.iterate(&mut session, &put, token.as_deref()).await {
                warn!("{}: session aborted ({}): {}", put_id, e.category(), e);
                session.fail(e.to_string());
                break;
            }
        }

        if !session.state().is_terminal() {
            session.exhaust();
        }

        let record = session.into_outcome();
        self.recorder_finalize(token.as_deref(), &record);

        if record.success {
            info!("{}: tests generated after {} attempt(s)", put_id, record.test_iterations_needed);
        } else {
            info!("{}: {}", put_id, record.error.as_deref().unwrap_or("failed"));
        }
        record
    }

    /// One attempt. `Err` is fatal for the session.
    async fn iterate(
        &self,
        session: &mut GenerationSession,
        put: &ProgramUnderTest,
        token: Option<&str>,
    ) -> Result<()> {
        let iteration = session.next_iteration();
        session.transition(SessionState::Prompting);

        // Only the most recent attempt feeds the next prompt.
        let previous = session.last_attempt();
        let prompt = self.prompts.build(
            put,
            previous.map(|a| a.code.as_str()),
            previous.and_then(|a| a.feedback.as_deref()),
        );

        debug!("{}: iteration {}/{}", put.id, iteration, session.max_iterations());
        let raw_response = self.llm.complete(&prompt).await.map_err(llm_error)?;
        let log_file = self
            .layout
            .write_interaction_log(&put.id, iteration, &prompt, &raw_response)?;

        session.transition(SessionState::Extracting);
        let extraction = self.extractor.extract(&raw_response);
        if !extraction.found {
            debug!("{}: no fenced block in response", put.id);
        }

        session.transition(SessionState::SyntaxCheck);
        let check = self.validator.validate(&extraction.code).await;
        self.record(token, |r| {
            r.record_code_generation(
                token.unwrap_or_default(),
                iteration,
                check.valid,
                &extraction.code,
                &raw_response,
            )
        });

        let mut attempt = Attempt {
            iteration,
            prompt,
            raw_response,
            code: extraction.code,
            confidence: extraction.confidence,
            syntax_valid: check.valid,
            syntax_error: check.error,
            execution: ExecutionResult::skipped(),
            coverage_percent: None,
            coverage_xml: None,
            log_file,
            feedback: None,
        };

        if !attempt.syntax_valid {
            // The latest candidate is kept on disk even when it does not parse.
            let test_file = self.executor.persist(&put.id, &attempt.code)?;
            session.set_test_file(test_file);
            session.transition(SessionState::Feedback);
            attempt.feedback = Some(self.feedback.syntax_failure(
                &put.id,
                attempt.confidence,
                attempt.syntax_error.as_ref(),
            ));
            debug!("{}: attempt {} invalid syntax", put.id, iteration);
            session.push_attempt(attempt);
            return Ok(());
        }

        session.transition(SessionState::Executing);
        let outcome = self
            .executor
            .execute(ExecutionRequest {
                code: &attempt.code,
                put_id: &put.id,
                iteration,
                module_root: self.puts.module_root(),
                coverage: self.settings.coverage,
                run: self.settings.run_tests,
            })
            .await?;
        session.set_test_file(outcome.test_path);

        if outcome.result.ran {
            self.layout.write_run_log(
                &put.id,
                iteration,
                &outcome.result.stdout,
                &outcome.result.stderr,
            )?;
        }

        attempt.coverage_percent = outcome.coverage_report.as_deref().and_then(parse_cobertura);
        attempt.coverage_xml = outcome.coverage_report;
        attempt.execution = outcome.result;

        let success = attempt.succeeded();
        self.record(token, |r| {
            r.record_test_generation(
                token.unwrap_or_default(),
                iteration,
                success,
                &attempt.code,
                attempt.coverage_percent,
            )
        });

        if success {
            debug!("{}: attempt {} succeeded", put.id, iteration);
            session.push_attempt(attempt);
            session.succeed();
        } else {
            session.transition(SessionState::Feedback);
            attempt.feedback = Some(self.feedback.execution_failure(&attempt.execution));
            debug!(
                "{}: attempt {} failed with exit code {:?}",
                put.id, iteration, attempt.execution.exit_code
            );
            session.push_attempt(attempt);
        }
        Ok(())
    }

    fn recorder_start(&self, put_id: &str) -> Option<String> {
        if !self.settings.record_experiments {
            return None;
        }
        match self.recorder.start(
            put_id,
            &self.settings.technique_id,
            &self.settings.llm.recorder_snapshot(),
        ) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Experiment recorder failed to start for {}: {}", put_id, e);
                None
            }
        }
    }

    /// Best-effort recorder call; skipped without a token.
    fn record<F>(&self, token: Option<&str>, call: F)
    where
        F: FnOnce(&dyn ExperimentRecorder) -> anyhow::Result<()>,
    {
        if token.is_none() {
            return;
        }
        if let Err(e) = call(self.recorder.as_ref()) {
            warn!("Experiment recorder error (ignored): {}", e);
        }
    }

    fn recorder_finalize(&self, token: Option<&str>, record: &OutcomeRecord) {
        let summary = ExperimentSummary {
            status: record.status.to_string(),
            success: record.success,
            iterations: record.test_iterations_needed,
            coverage_percent: record.coverage_percent,
            execution_time_secs: record.execution_time_secs,
            error: record.error.clone(),
        };
        self.record(token, |r| r.finalize(token.unwrap_or_default(), &summary));
    }
}

/// Model-call failures keep a timeout distinct; anything else becomes `Llm`.
fn llm_error(e: anyhow::Error) -> ElenchusError {
    match e.downcast::<ElenchusError>() {
        Ok(inner) => inner,
        Err(other) => ElenchusError::llm(format!("{other:#}")),
    }
}
