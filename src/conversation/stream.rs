//! Ordered, deduplicated live view of a conversation's messages.

use std::collections::HashMap;

use futures::Stream;
use tracing::{debug, warn};

use crate::core::models::Message;
use crate::errors::ChatError;
use crate::store::{ConversationStore, DocumentChange, StoreEvent, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamState {
    /// Subscribed, first result set not delivered yet.
    Pending,
    Live,
    Failed(String),
    Closed,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Order in which the id was first seen; breaks `created_at` ties.
    seq: u64,
    message: Message,
}

/// Live message view for one conversation, capped at the `limit` most recent
/// messages and ordered by `created_at` ascending.
#[derive(Debug)]
pub struct MessageStream {
    conversation_id: String,
    limit: usize,
    subscription: Option<Subscription>,
    entries: HashMap<String, Entry>,
    next_seq: u64,
    state: StreamState,
}

impl MessageStream {
    /// Opens the live query.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` if the store refuses the query.
    pub async fn subscribe(
        store: &dyn ConversationStore,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Self, ChatError> {
        let subscription = store.subscribe_messages(conversation_id, limit).await?;
        debug!(conversation_id = %conversation_id, limit, "Subscribed to messages");
        Ok(Self::from_subscription(conversation_id, limit, subscription))
    }

    #[must_use]
    pub fn from_subscription(conversation_id: &str, limit: usize, subscription: Subscription) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            limit,
            subscription: Some(subscription),
            entries: HashMap::new(),
            next_seq: 0,
            state: StreamState::Pending,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Waits for the store's next delivery and returns the updated view.
    ///
    /// Returns `None` once unsubscribed. After a failure every call yields the
    /// same error; the last good view is never handed out as current.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<Message>, ChatError>> {
        match &self.state {
            StreamState::Closed => return None,
            StreamState::Failed(reason) => {
                return Some(Err(ChatError::SubscriptionFailed(reason.clone())));
            }
            StreamState::Pending | StreamState::Live => {}
        }

        let event = match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        };

        match event {
            Some(StoreEvent::Reset(messages)) => {
                self.entries.clear();
                self.apply(messages.into_iter().map(DocumentChange::Upsert));
            }
            Some(StoreEvent::Changes(changes)) => self.apply(changes),
            Some(StoreEvent::Failed(reason)) => {
                warn!(conversation_id = %self.conversation_id, reason = %reason, "Message subscription failed");
                self.fail(reason);
            }
            None => self.fail("live query closed by store".to_string()),
        }

        Some(self.current())
    }

    /// The view as of the last delivery.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` if the subscription has failed, was closed,
    /// or has not delivered its first result set yet.
    pub fn current(&self) -> Result<Vec<Message>, ChatError> {
        match &self.state {
            StreamState::Live => Ok(self.ordered()),
            StreamState::Pending => Err(ChatError::SubscriptionFailed(
                "no result set delivered yet".to_string(),
            )),
            StreamState::Failed(reason) => Err(ChatError::SubscriptionFailed(reason.clone())),
            StreamState::Closed => Err(ChatError::SubscriptionFailed(
                "subscription released".to_string(),
            )),
        }
    }

    /// Releases the live query. Nothing is delivered afterwards.
    pub fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            debug!(conversation_id = %self.conversation_id, "Unsubscribed from messages");
        }
        self.state = StreamState::Closed;
        self.entries.clear();
    }

    /// Adapts the view into a `futures::Stream` of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Message>, ChatError>> {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next_snapshot().await?;
            // A failed view ends the stream after reporting the error once.
            if item.is_err() {
                stream.unsubscribe();
            }
            Some((item, stream))
        })
    }

    fn fail(&mut self, reason: String) {
        self.state = StreamState::Failed(reason);
        self.entries.clear();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    fn apply(&mut self, changes: impl IntoIterator<Item = DocumentChange>) {
        for change in changes {
            match change {
                DocumentChange::Upsert(message) => {
                    if message.conversation_id != self.conversation_id {
                        continue;
                    }
                    if let Some(entry) = self.entries.get_mut(&message.id) {
                        // Redelivery or server timestamp resolution: keep the first-seen slot.
                        entry.message = message;
                    } else {
                        let seq = self.next_seq;
                        self.next_seq += 1;
                        self.entries.insert(message.id.clone(), Entry { seq, message });
                    }
                }
                DocumentChange::Removed { message_id } => {
                    self.entries.remove(&message_id);
                }
            }
        }

        self.evict_beyond_limit();
        self.state = StreamState::Live;
    }

    fn sorted_entries(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.message
                .created_at
                .cmp(&b.message.created_at)
                .then(a.seq.cmp(&b.seq))
                .then_with(|| a.message.id.cmp(&b.message.id))
        });
        entries
    }

    fn evict_beyond_limit(&mut self) {
        let excess = self.entries.len().saturating_sub(self.limit);
        if excess == 0 {
            return;
        }
        let evicted: Vec<String> = self
            .sorted_entries()
            .into_iter()
            .take(excess)
            .map(|e| e.message.id.clone())
            .collect();
        for id in evicted {
            self.entries.remove(&id);
        }
    }

    fn ordered(&self) -> Vec<Message> {
        self.sorted_entries()
            .into_iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
