//! # ChatRelay Core
//!
//! Domain types, traits, and error definitions for the ChatRelay gateway.
//! This crate has **no HTTP or filesystem dependencies**; it defines the
//! model that the provider, memory, agent and gateway crates implement
//! against.
//!
//! - [`Provider`] abstracts the inference backend (Ollama, OpenAI-compatible).
//! - [`CancellationSignal`] is the consume-once stop flag observed by a
//!   generation session.
//! - [`ConversationTurn`] and [`ScoredMatch`] are the records exchanged with
//!   the history log and the knowledge directory.

pub mod cancel;
pub mod error;
pub mod message;
pub mod provider;
pub mod record;
pub mod text;

// Re-export key types at crate root for ergonomics
pub use cancel::CancellationSignal;
pub use error::{ProviderError, StoreError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use record::{ConversationTurn, KnowledgeDocument, ScoredMatch};
