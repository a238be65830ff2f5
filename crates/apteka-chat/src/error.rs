//! Error types for the conversational orchestrator.

use apteka_core::error::AptekaError;
use apteka_llm::LlmError;

/// Errors from handling one turn. None of them is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("audio payload is empty")]
    EmptyAudio,
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("language service did not provide a transcription")]
    MissingTranscription,
    #[error("language service requested a nearby search without coordinates")]
    MissingCoordinates,
    #[error("language service error: {0}")]
    Llm(#[from] LlmError),
    #[error("semantic index error: {0}")]
    Index(String),
    #[error("location lookup error: {0}")]
    Locator(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// True when the caller sent something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::EmptyAudio | ChatError::InvalidCoordinates(_))
    }
}

impl From<AptekaError> for ChatError {
    fn from(err: AptekaError) -> Self {
        match err {
            AptekaError::InvalidInput(msg) => ChatError::InvalidCoordinates(msg),
            AptekaError::Index(msg) | AptekaError::Embedding(msg) => ChatError::Index(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyAudio.to_string(), "audio payload is empty");
        assert_eq!(
            ChatError::MissingTranscription.to_string(),
            "language service did not provide a transcription"
        );
        assert_eq!(
            ChatError::Index("timeout".to_string()).to_string(),
            "semantic index error: timeout"
        );
        assert_eq!(
            ChatError::Llm(LlmError::EmptyResponse).to_string(),
            "language service error: service returned no candidates"
        );
    }

    #[test]
    fn test_from_apteka_error() {
        let err: ChatError = AptekaError::InvalidInput("latitude".to_string()).into();
        assert!(matches!(err, ChatError::InvalidCoordinates(_)));
        assert!(err.is_client_error());

        let err: ChatError = AptekaError::Embedding("quota".to_string()).into();
        assert!(matches!(err, ChatError::Index(_)));

        let err: ChatError = AptekaError::Storage("disk".to_string()).into();
        assert!(matches!(err, ChatError::Storage(ref m) if m.contains("disk")));
        assert!(!err.is_client_error());
    }
}
