use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use super::directory::ParticipantDirectory;
use super::reconciler::SummaryReconciler;
use super::stream::MessageStream;
use crate::ai::{Inference, InferenceClient, build_prompt_with_participants};
use crate::core::config::{AppConfig, DEFAULT_MAX_TOKENS, DEFAULT_MESSAGE_LIMIT};
use crate::core::models::{Conversation, Message, NewMessage};
use crate::errors::ChatError;
use crate::store::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarySettings {
    /// Live query cap; also bounds what a summary can see.
    pub message_limit: usize,
    pub max_tokens: u32,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&AppConfig> for SummarySettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            message_limit: config.message_limit,
            max_tokens: config.max_tokens,
        }
    }
}

/// Entry point for one signed-in user's session.
///
/// The orchestrator does not serialize summary requests: callers keep at most
/// one `request_summary` in flight per conversation (for example by disabling
/// the trigger until it returns).
pub struct ConversationOrchestrator {
    store: Arc<dyn ConversationStore>,
    inference: Arc<dyn Inference>,
    directory: ParticipantDirectory,
    reconciler: SummaryReconciler,
    session_user_id: String,
    settings: SummarySettings,
}

impl ConversationOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        inference: Arc<dyn Inference>,
        session_user_id: impl Into<String>,
        settings: SummarySettings,
    ) -> Self {
        Self {
            directory: ParticipantDirectory::new(Arc::clone(&store)),
            reconciler: SummaryReconciler::new(Arc::clone(&store)),
            store,
            inference,
            session_user_id: session_user_id.into(),
            settings,
        }
    }

    /// Wires an HTTP inference client from `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client can't be built.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        session_user_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let inference = InferenceClient::from_config(config)?;
        Ok(Self::new(
            store,
            Arc::new(inference),
            session_user_id,
            SummarySettings::from(config),
        ))
    }

    #[must_use]
    pub fn session_user_id(&self) -> &str {
        &self.session_user_id
    }

    #[must_use]
    pub fn directory(&self) -> &ParticipantDirectory {
        &self.directory
    }

    /// Opens the live message view for a conversation.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` if the store refuses the query.
    pub async fn subscribe(&self, conversation_id: &str) -> Result<MessageStream, ChatError> {
        MessageStream::subscribe(
            self.store.as_ref(),
            conversation_id,
            self.settings.message_limit,
        )
        .await
    }

    /// Creates a conversation between the session user and `other_user_id`;
    /// the AI participant is always included.
    ///
    /// # Errors
    ///
    /// Returns `StoreWriteFailed` if the store rejects the write.
    pub async fn start_conversation(&self, other_user_id: &str) -> Result<Conversation, ChatError> {
        let conversation = Conversation::new(
            Uuid::new_v4().to_string(),
            &[self.session_user_id.as_str(), other_user_id],
            Utc::now(),
        );
        self.store.create_conversation(conversation.clone()).await?;
        info!(conversation_id = %conversation.id, "Conversation started");
        Ok(conversation)
    }

    /// Posts a message authored by the session user.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessage` for blank text, or `StoreWriteFailed`.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let author = self.directory.resolve([self.session_user_id.as_str()]).await;
        let photo_ref = author
            .get(&self.session_user_id)
            .and_then(|p| p.photo_ref.clone());

        self.reconciler
            .append_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                author_id: self.session_user_id.clone(),
                text: text.to_string(),
                author_photo_ref: photo_ref,
                requested_by: None,
            })
            .await
    }

    /// Summarizes the current message window and posts the summary as an AI
    /// message.
    ///
    /// Any failure aborts the whole action. Nothing is written unless the
    /// inference text was fully recovered; a failure after inference (the
    /// write) can be retried by calling this again.
    ///
    /// # Errors
    ///
    /// Returns `EmptyConversation`, `SubscriptionFailed`, `ConversationNotFound`,
    /// one of the inference errors, or `StoreWriteFailed`.
    pub async fn request_summary(&self, conversation_id: &str) -> Result<Message, ChatError> {
        let result = self.summarize(conversation_id).await;
        if let Err(e) = &result {
            error!(conversation_id = %conversation_id, retryable = e.is_retryable(), "Summary request failed: {e}");
        }
        result
    }

    /// Removes every AI summary from the conversation.
    ///
    /// # Errors
    ///
    /// Returns `StoreReadFailed` or `StoreWriteFailed`.
    pub async fn clear_summaries(&self, conversation_id: &str) -> Result<usize, ChatError> {
        self.reconciler.clear_summaries(conversation_id).await
    }

    /// Clears existing summaries, then requests a fresh one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::clear_summaries`] and [`Self::request_summary`].
    pub async fn refresh_summary(&self, conversation_id: &str) -> Result<Message, ChatError> {
        self.clear_summaries(conversation_id).await?;
        self.request_summary(conversation_id).await
    }

    async fn summarize(&self, conversation_id: &str) -> Result<Message, ChatError> {
        let messages = self.snapshot(conversation_id).await?;
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        info!(conversation_id = %conversation_id, count = messages.len(), "Summarizing messages");

        let participant_ids: Vec<&str> = conversation.human_participants().collect();
        let ids = messages
            .iter()
            .map(|m| m.author_id.as_str())
            .chain(participant_ids.iter().copied())
            .chain(std::iter::once(self.session_user_id.as_str()));
        let directory = self.directory.resolve(ids).await;

        let prompt = build_prompt_with_participants(
            &messages,
            &directory,
            &self.session_user_id,
            &participant_ids,
        )?;
        let text = self
            .inference
            .infer(&prompt, self.settings.max_tokens)
            .await?;

        self.reconciler
            .replace_summary(conversation_id, &self.session_user_id, &text)
            .await
    }

    /// Current window of the live query, taken from its first delivery.
    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        let mut stream = self.subscribe(conversation_id).await?;
        let snapshot = stream.next_snapshot().await.unwrap_or_else(|| {
            Err(ChatError::SubscriptionFailed(
                "live query closed before delivering".to_string(),
            ))
        });
        stream.unsubscribe();
        snapshot
    }
}
