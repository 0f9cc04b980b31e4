use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("No messages to summarize")]
    EmptyConversation,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Inference endpoint returned status {status}: {body}")]
    InferenceUnavailable { status: u16, body: String },

    #[error("Failed to reach inference endpoint: {0}")]
    InferenceUnreachable(String),

    #[error("Inference response matched no known envelope: {0}")]
    InferenceMalformed(String),

    #[error("Failed to write to conversation store: {0}")]
    StoreWriteFailed(String),

    #[error("Failed to read from conversation store: {0}")]
    StoreReadFailed(String),

    #[error("Live message subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to look up participant {id}: {reason}")]
    DirectoryLookupFailed { id: String, reason: String },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl ChatError {
    /// Whether re-invoking the failed action can succeed without changing inputs.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::EmptyConversation
                | Self::EmptyMessage
                | Self::ConversationNotFound(_)
                | Self::ConfigError(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(error: reqwest::Error) -> Self {
        ChatError::InferenceUnreachable(error.to_string())
    }
}
