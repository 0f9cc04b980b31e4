//! Conversation state and the summarize action built on top of it.

pub mod directory;
pub mod orchestrator;
pub mod reconciler;
pub mod stream;

pub use directory::{Directory, ParticipantDirectory};
pub use orchestrator::{ConversationOrchestrator, SummarySettings};
pub use reconciler::SummaryReconciler;
pub use stream::MessageStream;
