use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant id that authors every AI summary.
pub const AI_PARTICIPANT_ID: &str = "memchat-ai";

/// Photo reference stamped on AI-authored messages.
pub const AI_PHOTO_REF: &str = "memchat://avatars/ai-summary.png";

pub const AI_DISPLAY_NAME: &str = "Memchat AI";

/// Display name used when a participant can't be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author_photo_ref: Option<String>,
    /// User who asked for this message to be written; set on AI summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl Message {
    #[must_use]
    pub fn is_ai_authored(&self) -> bool {
        self.author_id == AI_PARTICIPANT_ID
    }
}

/// A message as submitted by a writer, before the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    pub author_photo_ref: Option<String>,
    pub requested_by: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn ai_summary(conversation_id: &str, requesting_user_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            author_id: AI_PARTICIPANT_ID.to_string(),
            text: text.to_string(),
            author_photo_ref: Some(AI_PHOTO_REF.to_string()),
            requested_by: Some(requesting_user_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Builds a conversation whose participant set always ends with the AI id.
    /// Duplicate ids keep their first position.
    #[must_use]
    pub fn new(id: impl Into<String>, humans: &[&str], created_at: DateTime<Utc>) -> Self {
        let mut participant_ids: Vec<String> = Vec::with_capacity(humans.len() + 1);
        for id in humans
            .iter()
            .copied()
            .filter(|id| *id != AI_PARTICIPANT_ID)
            .chain(std::iter::once(AI_PARTICIPANT_ID))
        {
            if !participant_ids.iter().any(|p| p == id) {
                participant_ids.push(id.to_string());
            }
        }

        Self {
            id: id.into(),
            participant_ids,
            created_at,
            last_message: None,
            last_message_at: None,
        }
    }

    /// Participants other than the AI, in participant-set order.
    pub fn human_participants(&self) -> impl Iterator<Item = &str> {
        self.participant_ids
            .iter()
            .map(String::as_str)
            .filter(|id| *id != AI_PARTICIPANT_ID)
    }
}

/// Partial update for a conversation document. `None` leaves a field untouched;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub last_message: Option<Option<String>>,
    pub last_message_at: Option<Option<DateTime<Utc>>>,
}

impl ConversationPatch {
    /// Patch that points the last-message projection at `message`, or clears it.
    #[must_use]
    pub fn last_message_from(message: Option<&Message>) -> Self {
        Self {
            last_message: Some(message.map(|m| m.text.clone())),
            last_message_at: Some(message.map(|m| m.created_at)),
        }
    }

    pub fn apply(&self, conversation: &mut Conversation) {
        if let Some(last_message) = &self.last_message {
            conversation.last_message.clone_from(last_message);
        }
        if let Some(last_message_at) = self.last_message_at {
            conversation.last_message_at = last_message_at;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub photo_ref: Option<String>,
    pub email: Option<String>,
}

impl Participant {
    /// Placeholder for ids the store doesn't know or couldn't return.
    #[must_use]
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: UNKNOWN_DISPLAY_NAME.to_string(),
            photo_ref: None,
            email: None,
        }
    }

    #[must_use]
    pub fn ai() -> Self {
        Self {
            id: AI_PARTICIPANT_ID.to_string(),
            display_name: AI_DISPLAY_NAME.to_string(),
            photo_ref: Some(AI_PHOTO_REF.to_string()),
            email: None,
        }
    }
}
