//! Prompt construction for test generation requests.
//!
//! The prompt carries the PUT source verbatim and its module name. On retries
//! it additionally carries the most recent candidate and the feedback derived
//! from it, never the full attempt history.

use crate::config::Settings;
use crate::put::ProgramUnderTest;

/// Builds deterministic generation prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    /// Extra requirement lines appended to the default list.
    extra_requirements: Vec<String>,
}

impl PromptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder carrying the configured `prompt_requirements`.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        settings
            .prompt_requirements
            .iter()
            .fold(Self::new(), |builder, line| builder.with_requirement(line.as_str()))
    }

    /// Add a requirement line to every prompt.
    #[must_use]
    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.extra_requirements.push(requirement.into());
        self
    }

    /// Build the prompt for one generation request.
    ///
    /// `previous_code` and `feedback` are appended as delimited correction
    /// sections when present.
    #[must_use]
    pub fn build(
        &self,
        put: &ProgramUnderTest,
        previous_code: Option<&str>,
        feedback: Option<&str>,
    ) -> String {
        let module = put.module_name();
        let mut prompt = String::new();

        prompt.push_str(
            "You are a Python testing expert. Generate a comprehensive \
             Pytest-compatible test file for the following module.\n\n",
        );
        prompt.push_str(&format!("Module name: {module}\n\n"));
        prompt.push_str("Module source:\n```python\n");
        prompt.push_str(&put.source);
        if !put.source.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push_str("```\n\n");

        prompt.push_str("Requirements:\n");
        prompt.push_str("- Generate ONLY the test code, no explanations\n");
        prompt.push_str("- Use Pytest syntax and conventions\n");
        prompt.push_str("- Include multiple test cases covering edge cases\n");
        prompt.push_str("- Test both valid and invalid inputs\n");
        prompt.push_str("- Use descriptive test function names\n");
        prompt.push_str(&format!(
            "- Import the code under test from the module by name, e.g. `from {module} import ...`\n"
        ));
        for requirement in &self.extra_requirements {
            prompt.push_str(&format!("- {requirement}\n"));
        }

        if previous_code.is_some() || feedback.is_some() {
            prompt.push_str("\n## Correction Required\n\n");
            prompt.push_str(
                "Your previous attempt did not succeed. Correct it rather than \
                 starting over, and return the complete corrected test file.\n",
            );

            if let Some(code) = previous_code {
                prompt.push_str("\n### Previous Test Code\n\n```python\n");
                prompt.push_str(code);
                if !code.ends_with('\n') {
                    prompt.push('\n');
                }
                prompt.push_str("```\n");
            }

            if let Some(feedback) = feedback {
                prompt.push_str("\n### Feedback\n\n");
                prompt.push_str(feedback.trim_end());
                prompt.push('\n');
            }
        }

        prompt.push_str("\nOutput the test code in a Python code block:\n```python\n# Your test code here\n```");
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put() -> ProgramUnderTest {
        ProgramUnderTest::new(
            "he_0",
            "def add(a: int, b: int) -> int:\n    return a + b\n",
        )
    }

    #[test]
    fn test_initial_prompt_embeds_source_and_module() {
        let p = put();
        let prompt = PromptBuilder::new().build(&p, None, None);

        assert!(prompt.contains(&p.source));
        assert!(prompt.contains("Module name: he_0"));
        assert!(prompt.contains("from he_0 import"));
        assert!(!prompt.contains("Correction Required"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let p = put();
        let builder = PromptBuilder::new();
        assert_eq!(
            builder.build(&p, Some("x = 1"), Some("fix it")),
            builder.build(&p, Some("x = 1"), Some("fix it"))
        );
    }

    #[test]
    fn test_retry_prompt_has_delimited_sections() {
        let p = put();
        let prompt = PromptBuilder::new().build(
            &p,
            Some("def test_add():\n    assert add(1, 1) == 3"),
            Some("Exit code: 1"),
        );

        assert!(prompt.contains("## Correction Required"));
        assert!(prompt.contains("rather than starting over"));
        assert!(prompt.contains("### Previous Test Code"));
        assert!(prompt.contains("assert add(1, 1) == 3"));
        assert!(prompt.contains("### Feedback\n\nExit code: 1"));
        assert!(prompt.contains(&p.source));
    }

    #[test]
    fn test_feedback_without_previous_code() {
        let prompt = PromptBuilder::new().build(&put(), None, Some("be strict"));
        assert!(prompt.contains("### Feedback"));
        assert!(!prompt.contains("### Previous Test Code"));
    }

    #[test]
    fn test_extra_requirements() {
        let prompt = PromptBuilder::new()
            .with_requirement("Use pytest.mark.parametrize")
            .build(&put(), None, None);
        assert!(prompt.contains("- Use pytest.mark.parametrize\n"));
    }
}
