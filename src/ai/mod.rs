//! All AI/LLM functionality

pub mod client;
pub mod envelope;
pub mod prompt_builder;

// Re-export main types for convenience
pub use client::{Inference, InferenceClient, estimate_tokens};
pub use envelope::{InferenceEnvelope, normalize_response};
pub use prompt_builder::{build_prompt, build_prompt_with_participants};
