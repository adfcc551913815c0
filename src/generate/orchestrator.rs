//! The bounded generate → validate → retry loop.
//!
//! Each attempt is an immutable [`GenerationAttempt`]; the next prompt is
//! built only from the request and the previous attempt, so one orchestrator
//! can serve concurrent `generate` calls without sharing state between them.

use super::client::{ChatMessage, TextGenerator};
use super::error::GenerationError;
use super::parse::parse_response;
use super::prompts;
use super::validator::{StructuralValidator, ValidationResult};
use super::GeneratedArtifact;
use tracing::{debug, info, warn};

/// Attempts per `generate` call. Only validation failures consume attempts.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Create,
    Edit,
}

/// What the user asked for. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    user_prompt: String,
    mode: GenerationMode,
    existing_code: Option<String>,
}

impl GenerationRequest {
    pub fn create(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            mode: GenerationMode::Create,
            existing_code: None,
        }
    }

    pub fn edit(user_prompt: impl Into<String>, existing_code: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            mode: GenerationMode::Edit,
            existing_code: Some(existing_code.into()),
        }
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn existing_code(&self) -> Option<&str> {
        self.existing_code.as_deref()
    }
}

/// Record of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub prompt_sent: String,
    pub raw_response: String,
    pub parsed_code: String,
    pub validation: ValidationResult,
}

pub struct GenerationOrchestrator<G> {
    generator: G,
    model: String,
    validator: StructuralValidator,
    max_attempts: u32,
}

impl<G: TextGenerator> GenerationOrchestrator<G> {
    pub fn new(generator: G, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
            validator: StructuralValidator::new(),
            max_attempts: MAX_RETRIES,
        }
    }

    /// Override the attempt bound (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Run the loop for `request`.
    ///
    /// `progress` is called with `(attempt, max_attempts)` right before each
    /// request goes out. Collaborator failures end the call immediately;
    /// validation failures are retried with the error fed back to the model.
    pub async fn generate<F>(
        &self,
        request: &GenerationRequest,
        mut progress: F,
    ) -> Result<GeneratedArtifact, GenerationError>
    where
        F: FnMut(u32, u32),
    {
        let mut previous: Option<GenerationAttempt> = None;

        for attempt_number in 1..=self.max_attempts {
            let prompt_sent = match &previous {
                None => prompts::initial_prompt(request),
                Some(last) => prompts::retry_prompt(
                    request.user_prompt(),
                    &last.parsed_code,
                    last.validation.error_message(),
                ),
            };

            progress(attempt_number, self.max_attempts);
            debug!(
                attempt = attempt_number,
                max = self.max_attempts,
                model = %self.model,
                "requesting script"
            );

            let messages = [
                ChatMessage::system(prompts::GENERATION_SYSTEM),
                ChatMessage::user(prompt_sent.clone()),
            ];
            let raw_response = match self.generator.complete(&self.model, &messages).await {
                Ok(text) => text,
                Err(err) => {
                    warn!(attempt = attempt_number, error = %err, "text generation failed");
                    return Err(GenerationError::Collaborator(err));
                }
            };

            let (parsed, validation) = match parse_response(&raw_response) {
                Ok(parsed) => {
                    let validation = self.validator.validate_structure(parsed.code());
                    (Some(parsed), validation)
                }
                Err(err) => (None, ValidationResult::invalid(err.to_string())),
            };

            if let (Some(parsed), true) = (&parsed, validation.is_valid()) {
                let artifact = parsed.clone().into_artifact(&self.validator);
                info!(
                    attempt = attempt_number,
                    name = %artifact.name,
                    packages = artifact.external_packages.len(),
                    "script accepted"
                );
                return Ok(artifact);
            }

            warn!(
                attempt = attempt_number,
                error = validation.error_message(),
                "generated script failed validation"
            );
            previous = Some(GenerationAttempt {
                attempt_number,
                prompt_sent,
                parsed_code: parsed.map(|p| p.code().to_string()).unwrap_or_default(),
                raw_response,
                validation,
            });
        }

        let (attempts, message) = previous
            .map(|last| (last.attempt_number, last.validation.error_message().to_string()))
            .unwrap_or((0, String::new()));
        Err(GenerationError::Validation { attempts, message })
    }
}
