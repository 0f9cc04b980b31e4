//! Turns a message history into the summarization prompt.
//!
//! Output depends only on the inputs: no clock reads, no randomness, and
//! participants are picked in message order, so identical inputs always
//! produce byte-identical prompts.

use chrono::{DateTime, Utc};

use crate::conversation::directory::{Directory, display_name};
use crate::core::models::{AI_PARTICIPANT_ID, Message, UNKNOWN_DISPLAY_NAME};
use crate::errors::ChatError;

/// Upper bound on the transcript portion of the prompt, in characters.
pub const MAX_TRANSCRIPT_CHARS: usize = 12_000;

/// Upper bound on a single message's rendered text, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1_000;

const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";
const RANGE_DATE_FORMAT: &str = "%B %-d, %Y";

/// Collapses a message to one line: control characters (newlines included)
/// become spaces, runs of whitespace shrink to one, and the result is
/// hard-truncated.
#[must_use]
pub fn flatten_text(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_MESSAGE_CHARS)
        .collect()
}

/// Renders one transcript line: `<timestamp> | <display name> | <text>`.
#[must_use]
pub fn render_line(message: &Message, directory: &Directory) -> String {
    format!(
        "{} | {} | {}",
        message.created_at.format(LINE_TIMESTAMP_FORMAT),
        display_name(directory, &message.author_id),
        flatten_text(&message.text)
    )
}

/// The two humans the conversation is between.
///
/// Message authors come first, in order of first appearance, then the
/// conversation's own participants, then the requesting user. A slot stays
/// empty only when fewer than two humans are known at all.
#[must_use]
pub fn conversation_pair<'a>(
    messages: &[&'a Message],
    participant_ids: &[&'a str],
    requesting_user_id: &'a str,
) -> [Option<&'a str>; 2] {
    let mut pair: Vec<&str> = Vec::with_capacity(2);
    let candidates = messages
        .iter()
        .copied()
        .map(|m| m.author_id.as_str())
        .chain(participant_ids.iter().copied())
        .chain(std::iter::once(requesting_user_id))
        .filter(|id| *id != AI_PARTICIPANT_ID);

    for id in candidates {
        if pair.len() == 2 {
            break;
        }
        if !pair.contains(&id) {
            pair.push(id);
        }
    }

    [pair.first().copied(), pair.get(1).copied()]
}

/// Builds the summarization prompt.
///
/// AI-authored messages are dropped first so a summary never summarizes an
/// earlier summary. When the transcript exceeds [`MAX_TRANSCRIPT_CHARS`] the
/// oldest lines are dropped, and the date range covers only the lines kept.
///
/// # Errors
///
/// Returns `EmptyConversation` if no human-authored message remains.
pub fn build_prompt(
    messages: &[Message],
    directory: &Directory,
    requesting_user_id: &str,
) -> Result<String, ChatError> {
    build_prompt_with_participants(messages, directory, requesting_user_id, &[])
}

/// [`build_prompt`] for a conversation whose participant set is known, so a
/// participant who hasn't spoken yet is still named.
///
/// # Errors
///
/// Returns `EmptyConversation` if no human-authored message remains.
pub fn build_prompt_with_participants(
    messages: &[Message],
    directory: &Directory,
    requesting_user_id: &str,
    participant_ids: &[&str],
) -> Result<String, ChatError> {
    let human: Vec<&Message> = messages.iter().filter(|m| !m.is_ai_authored()).collect();
    if human.is_empty() {
        return Err(ChatError::EmptyConversation);
    }

    // Walk newest to oldest so the most recent lines survive the budget.
    let mut kept: Vec<(&Message, String)> = Vec::new();
    let mut used = 0usize;
    for message in human.iter().copied().rev() {
        let line = render_line(message, directory);
        let cost = line.chars().count() + 1;
        if !kept.is_empty() && used + cost > MAX_TRANSCRIPT_CHARS {
            break;
        }
        used += cost;
        kept.push((message, line));
    }
    kept.reverse();

    let (first, last) = date_range(kept.iter().map(|(m, _)| m.created_at))
        .ok_or(ChatError::EmptyConversation)?;

    let [a, b] = conversation_pair(&human, participant_ids, requesting_user_id);
    let name_a = a.map_or(UNKNOWN_DISPLAY_NAME, |id| display_name(directory, id));
    let name_b = b.map_or(UNKNOWN_DISPLAY_NAME, |id| display_name(directory, id));
    let requester = display_name(directory, requesting_user_id);
    let transcript = kept
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!(
        "You are summarizing a private conversation between {name_a} and {name_b} \
         that took place from {start} to {end}. \
         Write a concise summary addressed directly to {requester}. \
         Focus on the emotional tone of the exchange and on how the relationship \
         between {name_a} and {name_b} progressed over that period. \
         Do not quote the messages verbatim and do not invent events.\n\n\
         Conversation ({start} to {end}):\n{transcript}",
        start = first.format(RANGE_DATE_FORMAT),
        end = last.format(RANGE_DATE_FORMAT),
    ))
}

fn date_range(
    timestamps: impl Iterator<Item = DateTime<Utc>>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    timestamps.fold(None, |range, ts| match range {
        None => Some((ts, ts)),
        Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
    })
}
