use std::sync::Arc;

use futures::future::join_all;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{error, info, warn};

use crate::core::models::{AI_PARTICIPANT_ID, ConversationPatch, Message, NewMessage};
use crate::errors::ChatError;
use crate::store::ConversationStore;

/// Writes AI summaries into a conversation and removes earlier ones.
///
/// Writing and clearing are separate calls and are not atomic with each other:
/// two concurrent `replace_summary` calls can leave two AI messages until the
/// next `clear_summaries`. Callers keep at most one request in flight per
/// conversation.
pub struct SummaryReconciler {
    store: Arc<dyn ConversationStore>,
}

impl SummaryReconciler {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, ChatError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, ChatError>> + Send,
        T: Send,
    {
        let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(2);

        RetryIf::spawn(strategy, operation, ChatError::is_retryable).await
    }

    /// Inserts `message`, then points the conversation's last-message
    /// projection at it. The message lands first, so a reader never sees a
    /// projection newer than the messages it can load.
    ///
    /// # Errors
    ///
    /// Returns `StoreWriteFailed` if either step is still rejected after retries.
    pub async fn append_message(&self, message: NewMessage) -> Result<Message, ChatError> {
        let conversation_id = message.conversation_id.clone();

        let stored = self
            .with_retry(|| self.store.add_message(message.clone()))
            .await
            .map_err(|e| {
                error!(conversation_id = %conversation_id, "Failed to insert message: {e}");
                as_write_failure(e)
            })?;

        self.with_retry(|| {
            self.store.merge_conversation(
                &conversation_id,
                ConversationPatch::last_message_from(Some(&stored)),
            )
        })
        .await
        .map_err(|e| {
            warn!(
                conversation_id = %conversation_id,
                message_id = %stored.id,
                "Message written but projection update failed: {e}"
            );
            as_write_failure(e)
        })?;

        Ok(stored)
    }

    /// Writes `text` as a new AI-authored message requested by `requesting_user_id`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMessage` for blank text, or `StoreWriteFailed`.
    pub async fn replace_summary(
        &self,
        conversation_id: &str,
        requesting_user_id: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let stored = self
            .append_message(NewMessage::ai_summary(
                conversation_id,
                requesting_user_id,
                text,
            ))
            .await?;

        info!(
            conversation_id = %conversation_id,
            message_id = %stored.id,
            requested_by = %requesting_user_id,
            "Summary written"
        );
        Ok(stored)
    }

    /// Deletes every AI-authored message in the conversation and points the
    /// projection back at the newest surviving message (or clears it).
    ///
    /// Returns how many messages were removed; zero matches is a success.
    ///
    /// # Errors
    ///
    /// Returns `StoreReadFailed` if the AI messages can't be listed, or
    /// `StoreWriteFailed` if a deletion or the projection update fails.
    pub async fn clear_summaries(&self, conversation_id: &str) -> Result<usize, ChatError> {
        let summaries = self
            .with_retry(|| {
                self.store
                    .find_messages_by_author(conversation_id, AI_PARTICIPANT_ID)
            })
            .await?;

        if summaries.is_empty() {
            info!(conversation_id = %conversation_id, "No summaries to clear");
            return Ok(0);
        }

        let deletions = summaries.iter().map(|message| async move {
            self.with_retry(|| self.store.delete_message(conversation_id, &message.id))
                .await
        });

        let mut removed = 0usize;
        let mut failures = Vec::new();
        for (message, result) in summaries.iter().zip(join_all(deletions).await) {
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    error!(message_id = %message.id, "Failed to delete summary: {e}");
                    failures.push(message.id.clone());
                }
            }
        }

        // The projection may have pointed at a deleted summary.
        let latest = self
            .with_retry(|| self.store.latest_message(conversation_id))
            .await?;
        self.with_retry(|| {
            self.store.merge_conversation(
                conversation_id,
                ConversationPatch::last_message_from(latest.as_ref()),
            )
        })
        .await
        .map_err(as_write_failure)?;

        if !failures.is_empty() {
            return Err(ChatError::StoreWriteFailed(format!(
                "removed {removed} summaries, failed to remove {}",
                failures.len()
            )));
        }

        info!(conversation_id = %conversation_id, removed, "Summaries cleared");
        Ok(removed)
    }
}

fn as_write_failure(error: ChatError) -> ChatError {
    match error {
        ChatError::StoreWriteFailed(_) | ChatError::ConversationNotFound(_) => error,
        other => ChatError::StoreWriteFailed(other.to_string()),
    }
}
