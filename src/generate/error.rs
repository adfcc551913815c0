/// Failure of the text-generation collaborator itself.
///
/// These are infrastructure problems (network, credentials, provider) and are
/// never retried by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Request timed out. The API took too long to respond.")]
    Timeout,

    #[error("Could not connect to the API endpoint ({0}). Check your URL and network connection.")]
    Connection(String),

    #[error("Authentication failed. Check your API key.")]
    Unauthorized,

    #[error("Rate limit exceeded. Please wait and try again.")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected API response format: {0}")]
    MalformedResponse(String),

    #[error("LLM is not configured: {0}")]
    NotConfigured(String),
}

/// A model response with nothing usable in it.
///
/// Absorbed by the orchestrator and fed back to the model as a validation
/// failure; never returned to callers.
#[derive(Debug, thiserror::Error)]
#[error("The response contained no code")]
pub struct ResponseFormatError;

/// The two outcomes a caller of `generate` has to branch on.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error(
        "Generated script failed validation after {attempts} attempt(s):\n{message}\n\n\
         Try rephrasing your request or describing the script in more detail."
    )]
    Validation { attempts: u32, message: String },
}

impl GenerationError {
    /// Whether the user should look at connectivity/credentials rather than the prompt.
    pub fn is_collaborator(&self) -> bool {
        matches!(self, GenerationError::Collaborator(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_mentions_last_message_and_hint() {
        let err = GenerationError::Validation {
            attempts: 3,
            message: "Missing required definitions: main()".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("after 3 attempt(s)"));
        assert!(text.contains("Missing required definitions: main()"));
        assert!(text.contains("rephrasing"));
        assert!(!err.is_collaborator());
    }

    #[test]
    fn test_collaborator_error_converts() {
        let err: GenerationError = CollaboratorError::Unauthorized.into();
        assert!(err.is_collaborator());
        assert!(err.to_string().contains("Check your API key"));
    }
}
