//! LLM-backed script generation.
//!
//! The orchestrator asks a [`TextGenerator`] for a script, normalises the
//! response, checks it with the [`StructuralValidator`] and re-prompts with the
//! validation error until the script is accepted or attempts run out.

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod validator;

pub use client::{ChatClient, ChatMessage, TextGenerator, DEFAULT_TIMEOUT_SECS};
pub use error::{CollaboratorError, GenerationError, ResponseFormatError};
pub use orchestrator::{
    GenerationAttempt, GenerationMode, GenerationOrchestrator, GenerationRequest, MAX_RETRIES,
};
pub use validator::{ScriptMetadata, StructuralValidator, ValidationResult};

use serde::Serialize;

/// An accepted script, ready for the caller to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedArtifact {
    pub code: String,
    pub name: String,
    pub description: String,
    /// Third-party packages the script needs, in the order reported.
    pub external_packages: Vec<String>,
}
