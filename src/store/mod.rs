//! Remote document store seam.
//!
//! The conversation engine never talks to a concrete backend directly. Every
//! read, write and live query goes through [`ConversationStore`], so a session
//! is handed an explicitly constructed store handle instead of reaching for a
//! process-wide client.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::models::{Conversation, ConversationPatch, Message, NewMessage, Participant};
use crate::errors::ChatError;

pub use memory::MemoryStore;

/// One change to the result set of a live message query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    /// Added or modified. Stores may redeliver unchanged documents.
    Upsert(Message),
    Removed { message_id: String },
}

/// What a live query pushes to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Full replacement of the result set.
    Reset(Vec<Message>),
    Changes(Vec<DocumentChange>),
    /// The query can no longer be served (permission revoked, transport lost).
    Failed(String),
}

/// Handle to a live query. Dropping it or calling [`Subscription::cancel`]
/// releases the listener; no further events are delivered afterwards.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<StoreEvent>,
    listener: Option<JoinHandle<()>>,
}

impl Subscription {
    #[must_use]
    pub fn new(events: mpsc::UnboundedReceiver<StoreEvent>, listener: Option<JoinHandle<()>>) -> Self {
        Self { events, listener }
    }

    /// Waits for the next event. `None` once the query is closed or cancelled.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.events.close();
        // Anything buffered before the close is discarded too.
        while self.events.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Opens a live query over the `limit` most recent messages of a conversation,
    /// ordered by `created_at` ascending.
    async fn subscribe_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Subscription, ChatError>;

    async fn get_participant(&self, participant_id: &str)
    -> Result<Option<Participant>, ChatError>;

    async fn get_conversation(&self, conversation_id: &str)
    -> Result<Option<Conversation>, ChatError>;

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), ChatError>;

    /// Inserts a message, assigning its id and server timestamp. Fails with
    /// `ConversationNotFound`, writing nothing, if the conversation doesn't exist.
    async fn add_message(&self, message: NewMessage) -> Result<Message, ChatError>;

    /// Merge-updates the conversation document; fields absent from the patch are untouched.
    async fn merge_conversation(
        &self,
        conversation_id: &str,
        patch: ConversationPatch,
    ) -> Result<(), ChatError>;

    async fn find_messages_by_author(
        &self,
        conversation_id: &str,
        author_id: &str,
    ) -> Result<Vec<Message>, ChatError>;

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<Message>, ChatError>;

    /// Deletes a message. Deleting an id that is already gone succeeds.
    async fn delete_message(&self, conversation_id: &str, message_id: &str)
    -> Result<(), ChatError>;
}
