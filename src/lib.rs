/// Memchat - a two-person chat whose history can be summarized by a language model.
///
/// This crate keeps a live, ordered view of a conversation synchronized against a
/// document store and turns that history into AI-written summaries:
/// 1. A message stream that deduplicates and orders what the store pushes
/// 2. A prompt builder and an inference client that normalizes both response envelopes
/// 3. A reconciler that writes (and clears) AI-authored summary messages
///
/// # Architecture
///
/// The system uses:
/// - An injected `ConversationStore` handle for every read, write and live query
/// - reqwest for the chat completion endpoint
/// - tokio-retry for store writes
/// - Tokio for async runtime
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use memchat::core::config::AppConfig;
/// use memchat::conversation::ConversationOrchestrator;
/// use memchat::store::MemoryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Set up structured logging
///     memchat::setup_logging();
///
///     let config = AppConfig::new("http://localhost:8080/v1/chat/completions");
///     let store = Arc::new(MemoryStore::new());
///
///     let alice = ConversationOrchestrator::from_config(&config, store.clone(), "alice")?;
///     let conversation = alice.start_conversation("bob").await?;
///     alice.send_message(&conversation.id, "Hi Bob!").await?;
///
///     match alice.request_summary(&conversation.id).await {
///         Ok(summary) => println!("Summary: {}", summary.text),
///         Err(e) if e.is_retryable() => println!("Try again later: {e}"),
///         Err(e) => println!("Can't summarize: {e}"),
///     }
///
///     Ok(())
/// }
/// ```
// Module declarations
pub mod ai;
pub mod conversation;
pub mod core;
pub mod errors;
pub mod store;

pub use conversation::ConversationOrchestrator;
pub use errors::ChatError;

/// Configure structured logging with JSON format.
///
/// Log levels come from `RUST_LOG` and default to `info`. Calling this more
/// than once is harmless; only the first call installs a subscriber.
///
/// # Example
///
/// ```
/// // Initialize structured logging at process start
/// memchat::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
