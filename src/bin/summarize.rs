// Summarizes a conversation transcript file against the configured endpoint.
//
// Usage: memchat-summarize <transcript.json>
//
// The transcript holds the conversation, its participants and its messages in
// the same camelCase shape the store uses.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use memchat::ConversationOrchestrator;
use memchat::core::config::AppConfig;
use memchat::core::models::{Conversation, Message, Participant};
use memchat::store::{ConversationStore, MemoryStore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transcript {
    session_user_id: String,
    conversation: Conversation,
    #[serde(default)]
    participants: Vec<Participant>,
    messages: Vec<Message>,
}

#[tokio::main]
async fn main() -> Result<()> {
    memchat::setup_logging();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: memchat-summarize <transcript.json>");
    };

    let config = AppConfig::from_env().map_err(anyhow::Error::msg)?;
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let transcript: Transcript =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    let store = Arc::new(MemoryStore::new());
    for participant in transcript.participants {
        store.put_participant(participant)?;
    }
    let conversation_id = transcript.conversation.id.clone();
    store.create_conversation(transcript.conversation).await?;
    for message in transcript.messages {
        store.insert_message(message)?;
    }

    info!(conversation_id = %conversation_id, "Transcript loaded");

    let orchestrator =
        ConversationOrchestrator::from_config(&config, store, transcript.session_user_id)?;
    info!(requested_by = %orchestrator.session_user_id(), "Requesting summary");
    let summary = orchestrator.request_summary(&conversation_id).await?;

    println!("{}", summary.text);
    Ok(())
}
