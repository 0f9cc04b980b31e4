//! In-process conversation store.
//!
//! Behaves like the remote document store the engine is written against:
//! server-assigned ids and timestamps, merge updates on conversation
//! documents, and live queries that push changes to subscribers. Faults can be
//! injected to exercise the engine's failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ConversationStore, DocumentChange, StoreEvent, Subscription};
use crate::core::models::{Conversation, ConversationPatch, Message, NewMessage, Participant};
use crate::errors::ChatError;

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Notice {
    conversation_id: String,
    event: StoreEvent,
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    /// Per conversation, in insertion order.
    messages: HashMap<String, Vec<Message>>,
    participants: HashMap<String, Participant>,
    failing_participants: HashSet<String>,
    revoked: HashSet<String>,
    reject_writes: bool,
}

impl StoreState {
    /// The `limit` most recent messages, oldest first. Ties keep insertion order.
    fn recent_messages(&self, conversation_id: &str, limit: usize) -> Vec<Message> {
        let mut messages = self
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        let skip = messages.len().saturating_sub(limit);
        messages.split_off(skip)
    }

    fn check_writable(&self) -> Result<(), ChatError> {
        if self.reject_writes {
            return Err(ChatError::StoreWriteFailed(
                "write rejected by store".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    notices: broadcast::Sender<Notice>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            notices,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, ChatError> {
        self.state
            .read()
            .map_err(|_| ChatError::StoreReadFailed("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, ChatError> {
        self.state
            .write()
            .map_err(|_| ChatError::StoreWriteFailed("store lock poisoned".to_string()))
    }

    fn notify(&self, conversation_id: &str, event: StoreEvent) {
        // No receivers just means nobody is listening right now.
        let _ = self.notices.send(Notice {
            conversation_id: conversation_id.to_string(),
            event,
        });
    }

    /// Registers or replaces a participant profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn put_participant(&self, participant: Participant) -> Result<(), ChatError> {
        self.write()?
            .participants
            .insert(participant.id.clone(), participant);
        Ok(())
    }

    /// Inserts a fully-formed message, keeping its id and timestamp. Used to load
    /// existing history.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn insert_message(&self, message: Message) -> Result<(), ChatError> {
        let conversation_id = message.conversation_id.clone();
        self.write()?
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());
        self.notify(
            &conversation_id,
            StoreEvent::Changes(vec![DocumentChange::Upsert(message)]),
        );
        Ok(())
    }

    /// Every message of a conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        Ok(self.read()?.recent_messages(conversation_id, usize::MAX))
    }

    /// Makes every subsequent write fail until turned off again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn set_reject_writes(&self, reject: bool) -> Result<(), ChatError> {
        self.write()?.reject_writes = reject;
        Ok(())
    }

    /// Makes point reads of one participant fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn fail_participant_reads(&self, participant_id: &str) -> Result<(), ChatError> {
        self.write()?
            .failing_participants
            .insert(participant_id.to_string());
        Ok(())
    }

    /// Revokes read access to a conversation. Live queries on it fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn revoke_access(&self, conversation_id: &str) -> Result<(), ChatError> {
        self.write()?.revoked.insert(conversation_id.to_string());
        self.notify(
            conversation_id,
            StoreEvent::Failed(format!("permission denied for {conversation_id}")),
        );
        Ok(())
    }

    /// Server timestamp: wall clock, but never at or before the newest message
    /// already in the conversation.
    fn server_timestamp(state: &StoreState, conversation_id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        state
            .messages
            .get(conversation_id)
            .and_then(|messages| messages.iter().map(|m| m.created_at).max())
            .map_or(now, |latest| now.max(latest + Duration::milliseconds(1)))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn subscribe_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Subscription, ChatError> {
        // Subscribe before taking the snapshot so nothing written in between is missed.
        let mut notices = self.notices.subscribe();
        let initial = {
            let state = self.read()?;
            if state.revoked.contains(conversation_id) {
                return Err(ChatError::SubscriptionFailed(format!(
                    "permission denied for {conversation_id}"
                )));
            }
            state.recent_messages(conversation_id, limit)
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StoreEvent::Reset(initial));

        let state = Arc::clone(&self.state);
        let conversation_id = conversation_id.to_string();
        let listener = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = tx.closed() => break,
                    notice = notices.recv() => match notice {
                        Ok(notice) if notice.conversation_id == conversation_id => {
                            match notice.event {
                                StoreEvent::Changes(changes) => {
                                    widen_removals(&state, &conversation_id, limit, changes)
                                }
                                other => other,
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(conversation_id = %conversation_id, skipped, "Live query lagged; resending snapshot");
                            snapshot_event(&state, &conversation_id, limit)
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                let failed = matches!(event, StoreEvent::Failed(_));
                if tx.send(event).is_err() || failed {
                    break;
                }
            }
            debug!(conversation_id = %conversation_id, "Live query listener stopped");
        });

        Ok(Subscription::new(rx, Some(listener)))
    }

    async fn get_participant(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, ChatError> {
        let state = self.read()?;
        if state.failing_participants.contains(participant_id) {
            return Err(ChatError::StoreReadFailed(format!(
                "participant {participant_id} unavailable"
            )));
        }
        Ok(state.participants.get(participant_id).cloned())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, ChatError> {
        Ok(self.read()?.conversations.get(conversation_id).cloned())
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), ChatError> {
        let mut state = self.write()?;
        state.check_writable()?;
        state
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn add_message(&self, message: NewMessage) -> Result<Message, ChatError> {
        let stored = {
            let mut state = self.write()?;
            state.check_writable()?;
            if !state.conversations.contains_key(&message.conversation_id) {
                return Err(ChatError::ConversationNotFound(message.conversation_id));
            }
            let created_at = Self::server_timestamp(&state, &message.conversation_id);
            let stored = Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: message.conversation_id,
                author_id: message.author_id,
                text: message.text,
                created_at,
                author_photo_ref: message.author_photo_ref,
                requested_by: message.requested_by,
            };
            state
                .messages
                .entry(stored.conversation_id.clone())
                .or_default()
                .push(stored.clone());
            stored
        };

        self.notify(
            &stored.conversation_id,
            StoreEvent::Changes(vec![DocumentChange::Upsert(stored.clone())]),
        );
        Ok(stored)
    }

    async fn merge_conversation(
        &self,
        conversation_id: &str,
        patch: ConversationPatch,
    ) -> Result<(), ChatError> {
        let mut state = self.write()?;
        state.check_writable()?;
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
        patch.apply(conversation);
        Ok(())
    }

    async fn find_messages_by_author(
        &self,
        conversation_id: &str,
        author_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let state = self.read()?;
        Ok(state
            .recent_messages(conversation_id, usize::MAX)
            .into_iter()
            .filter(|m| m.author_id == author_id)
            .collect())
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<Message>, ChatError> {
        Ok(self.read()?.recent_messages(conversation_id, 1).pop())
    }

    async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), ChatError> {
        {
            let mut state = self.write()?;
            state.check_writable()?;
            if let Some(messages) = state.messages.get_mut(conversation_id) {
                messages.retain(|m| m.id != message_id);
            }
        }

        self.notify(
            conversation_id,
            StoreEvent::Changes(vec![DocumentChange::Removed {
                message_id: message_id.to_string(),
            }]),
        );
        Ok(())
    }
}

fn snapshot_event(state: &RwLock<StoreState>, conversation_id: &str, limit: usize) -> StoreEvent {
    match state.read() {
        Ok(state) => StoreEvent::Reset(state.recent_messages(conversation_id, limit)),
        Err(_) => StoreEvent::Failed("store lock poisoned".to_string()),
    }
}

/// A removal can pull an older message into a capped window, so removals are
/// followed by the whole current window.
fn widen_removals(
    state: &RwLock<StoreState>,
    conversation_id: &str,
    limit: usize,
    mut changes: Vec<DocumentChange>,
) -> StoreEvent {
    if !changes
        .iter()
        .any(|c| matches!(c, DocumentChange::Removed { .. }))
    {
        return StoreEvent::Changes(changes);
    }

    match state.read() {
        Ok(state) => {
            changes.extend(
                state
                    .recent_messages(conversation_id, limit)
                    .into_iter()
                    .map(DocumentChange::Upsert),
            );
            StoreEvent::Changes(changes)
        }
        Err(_) => StoreEvent::Failed("store lock poisoned".to_string()),
    }
}
