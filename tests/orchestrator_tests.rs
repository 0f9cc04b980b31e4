use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use memchat::ConversationOrchestrator;
use memchat::ai::Inference;
use memchat::conversation::SummarySettings;
use memchat::core::models::{AI_PARTICIPANT_ID, AI_PHOTO_REF, Conversation, Message, Participant};
use memchat::errors::ChatError;
use memchat::store::{ConversationStore, MemoryStore};

/// Inference stand-in that returns a canned answer and records prompts.
struct StubInference {
    reply: Result<String, fn() -> ChatError>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl StubInference {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(error: fn() -> ChatError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Inference for StubInference {
    async fn infer(&self, prompt: &str, _max_tokens: u32) -> Result<String, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(make) => Err(make()),
        }
    }
}

fn participant(id: &str, name: &str) -> Participant {
    Participant {
        id: id.to_string(),
        display_name: name.to_string(),
        photo_ref: Some(format!("https://example.com/{id}.png")),
        email: Some(format!("{id}@example.com")),
    }
}

fn history_message(id: &str, author: &str, text: &str, minute: u32) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: "c1".to_string(),
        author_id: author.to_string(),
        text: text.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap(),
        author_photo_ref: None,
        requested_by: None,
    }
}

/// Conversation between A and B with "Hi" at T1 and "How are you?" at T2.
async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_participant(participant("A", "Ada")).unwrap();
    store.put_participant(participant("B", "Ben")).unwrap();

    let mut conversation = Conversation::new("c1", &["A", "B"], Utc::now());
    conversation.last_message = Some("How are you?".to_string());
    store.create_conversation(conversation).await.unwrap();

    store.insert_message(history_message("m1", "A", "Hi", 1)).unwrap();
    store.insert_message(history_message("m2", "B", "How are you?", 2)).unwrap();
    store
}

fn orchestrator(store: &Arc<MemoryStore>, inference: Arc<StubInference>) -> ConversationOrchestrator {
    ConversationOrchestrator::new(store.clone(), inference, "A", SummarySettings::default())
}

async fn ai_messages(store: &MemoryStore) -> Vec<Message> {
    store.find_messages_by_author("c1", AI_PARTICIPANT_ID).await.unwrap()
}

async fn last_message(store: &MemoryStore) -> Option<String> {
    store.get_conversation("c1").await.unwrap().unwrap().last_message
}

#[tokio::test]
async fn test_request_summary_end_to_end() {
    let store = seeded_store().await;
    let inference = StubInference::replying("A greeted B.");
    let orchestrator = orchestrator(&store, inference.clone());

    let summary = orchestrator.request_summary("c1").await.unwrap();

    assert_eq!(summary.text, "A greeted B.");
    assert_eq!(summary.author_photo_ref.as_deref(), Some(AI_PHOTO_REF));
    let ai = ai_messages(&store).await;
    assert_eq!(ai.len(), 1);
    assert_eq!(ai[0].text, "A greeted B.");
    assert_eq!(last_message(&store).await.as_deref(), Some("A greeted B."));

    let prompts = inference.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("2024-06-01 12:01 | Ada | Hi"));
    assert!(prompts[0].contains("2024-06-01 12:02 | Ben | How are you?"));
    assert!(prompts[0].contains("between Ada and Ben"));
    assert!(prompts[0].contains("addressed directly to Ada"));
}

#[tokio::test]
async fn test_previous_summary_is_not_resummarized() {
    let store = seeded_store().await;
    let inference = StubInference::replying("Second take.");
    let orchestrator = orchestrator(&store, inference.clone());

    store
        .insert_message(history_message("old", AI_PARTICIPANT_ID, "OLD-SUMMARY", 3))
        .unwrap();
    orchestrator.request_summary("c1").await.unwrap();

    assert!(!inference.prompts.lock().unwrap()[0].contains("OLD-SUMMARY"));
}

#[tokio::test]
async fn test_replace_then_clear_round_trip() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("A greeted B."));

    orchestrator.request_summary("c1").await.unwrap();
    let removed = orchestrator.clear_summaries("c1").await.unwrap();

    assert_eq!(removed, 1);
    assert!(ai_messages(&store).await.is_empty());
    assert_eq!(last_message(&store).await.as_deref(), Some("How are you?"));
}

#[tokio::test]
async fn test_clear_without_summaries() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("unused"));

    assert_eq!(orchestrator.clear_summaries("c1").await.unwrap(), 0);
    assert_eq!(last_message(&store).await.as_deref(), Some("How are you?"));
}

#[tokio::test]
async fn test_refresh_keeps_a_single_summary() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("Fresh."));

    orchestrator.request_summary("c1").await.unwrap();
    orchestrator.request_summary("c1").await.unwrap();
    assert_eq!(ai_messages(&store).await.len(), 2);

    orchestrator.refresh_summary("c1").await.unwrap();
    assert_eq!(ai_messages(&store).await.len(), 1);
}

#[tokio::test]
async fn test_empty_conversation_skips_inference() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_conversation(Conversation::new("c1", &["A", "B"], Utc::now()))
        .await
        .unwrap();
    let inference = StubInference::replying("never");
    let orchestrator = orchestrator(&store, inference.clone());

    let err = orchestrator.request_summary("c1").await.unwrap_err();

    assert!(matches!(err, ChatError::EmptyConversation));
    assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inference_failures_leave_conversation_unchanged() {
    let failures: [fn() -> ChatError; 3] = [
        || ChatError::InferenceUnavailable {
            status: 502,
            body: "bad gateway".to_string(),
        },
        || ChatError::InferenceUnreachable("connection reset".to_string()),
        || ChatError::InferenceMalformed("garbage".to_string()),
    ];

    for make in failures {
        let store = seeded_store().await;
        let orchestrator = orchestrator(&store, StubInference::failing(make));

        let err = orchestrator.request_summary("c1").await.unwrap_err();

        assert_eq!(err.to_string(), make().to_string());
        assert!(ai_messages(&store).await.is_empty());
        assert_eq!(store.messages("c1").unwrap().len(), 2);
        assert_eq!(last_message(&store).await.as_deref(), Some("How are you?"));
    }
}

#[tokio::test]
async fn test_rejected_write_is_surfaced() {
    let store = seeded_store().await;
    store.set_reject_writes(true).unwrap();
    let orchestrator = orchestrator(&store, StubInference::replying("A greeted B."));

    let err = orchestrator.request_summary("c1").await.unwrap_err();

    assert!(matches!(err, ChatError::StoreWriteFailed(_)));
    assert!(err.is_retryable());
    assert!(ai_messages(&store).await.is_empty());
}

#[tokio::test]
async fn test_revoked_access_fails_the_summary() {
    let store = seeded_store().await;
    store.revoke_access("c1").unwrap();
    let orchestrator = orchestrator(&store, StubInference::replying("unused"));

    let err = orchestrator.request_summary("c1").await.unwrap_err();
    assert!(matches!(err, ChatError::SubscriptionFailed(_)));
}

#[tokio::test]
async fn test_unknown_participant_degrades_to_placeholder() {
    let store = seeded_store().await;
    store.fail_participant_reads("B").unwrap();
    let inference = StubInference::replying("ok");
    let orchestrator = orchestrator(&store, inference.clone());

    orchestrator.request_summary("c1").await.unwrap();

    assert!(inference.prompts.lock().unwrap()[0].contains("| Unknown | How are you?"));
}

#[tokio::test]
async fn test_send_message_and_start_conversation() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("unused"));

    let conversation = orchestrator.start_conversation("B").await.unwrap();
    assert_eq!(orchestrator.session_user_id(), "A");
    assert_eq!(conversation.participant_ids, vec!["A", "B", AI_PARTICIPANT_ID]);

    let sent = orchestrator.send_message(&conversation.id, "Hello Ben").await.unwrap();
    assert_eq!(sent.author_id, "A");
    assert_eq!(sent.author_photo_ref.as_deref(), Some("https://example.com/A.png"));

    let stored = store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.last_message.as_deref(), Some("Hello Ben"));
    assert_eq!(stored.last_message_at, Some(sent.created_at));

    assert!(matches!(
        orchestrator.send_message(&conversation.id, "   ").await,
        Err(ChatError::EmptyMessage)
    ));
}

#[tokio::test]
async fn test_live_stream_follows_summary_lifecycle() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("A greeted B."));

    let mut stream = orchestrator.subscribe("c1").await.unwrap();
    assert_eq!(stream.conversation_id(), "c1");
    let initial = stream.next_snapshot().await.unwrap().unwrap();
    assert_eq!(initial.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["Hi", "How are you?"]);

    orchestrator.request_summary("c1").await.unwrap();
    let after_summary = stream.next_snapshot().await.unwrap().unwrap();
    assert_eq!(after_summary.len(), 3);
    assert_eq!(after_summary[2].text, "A greeted B.");

    orchestrator.clear_summaries("c1").await.unwrap();
    let after_clear = stream.next_snapshot().await.unwrap().unwrap();
    assert_eq!(after_clear.len(), 2);
    assert!(after_clear.iter().all(|m| !m.is_ai_authored()));
}

#[tokio::test]
async fn test_stream_reports_revocation() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("unused"));

    let mut stream = orchestrator.subscribe("c1").await.unwrap().into_stream().boxed();
    assert!(stream.next().await.unwrap().is_ok());

    store.revoke_access("c1").unwrap();
    assert!(matches!(
        stream.next().await,
        Some(Err(ChatError::SubscriptionFailed(_)))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_silent_participant_is_named_from_conversation() {
    let store = Arc::new(MemoryStore::new());
    store.put_participant(participant("A", "Ada")).unwrap();
    store.put_participant(participant("B", "Ben")).unwrap();
    store
        .create_conversation(Conversation::new("c1", &["A", "B"], Utc::now()))
        .await
        .unwrap();
    store.insert_message(history_message("m1", "A", "Hi", 1)).unwrap();
    let inference = StubInference::replying("Ada said hello.");
    let orchestrator = orchestrator(&store, inference.clone());

    orchestrator.request_summary("c1").await.unwrap();

    let ben = orchestrator.directory().cached("B").await.unwrap();
    assert_eq!(ben.display_name, "Ben");

    let prompts = inference.prompts.lock().unwrap();
    assert!(prompts[0].contains("between Ada and Ben"));
    assert!(!prompts[0].contains("Unknown"));
}

#[tokio::test]
async fn test_send_message_to_unknown_conversation_writes_nothing() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(&store, StubInference::replying("unused"));

    let err = orchestrator.send_message("nope", "hello").await.unwrap_err();

    assert!(matches!(err, ChatError::ConversationNotFound(_)));
    assert!(!err.is_retryable());
    assert!(store.messages("nope").unwrap().is_empty());
}
