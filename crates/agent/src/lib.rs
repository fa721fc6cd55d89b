//! The ChatRelay chat pipeline.
//!
//! A request goes through three steps:
//!
//! 1. **Gather** recent history and knowledge matches ([`ChatAgent::gather`])
//! 2. **Compose** them with the user message into one prompt ([`compose`])
//! 3. **Stream** the model's answer through a [`GenerationSession`], which
//!    echoes the context, relays tokens, and records the finished turn
//!
//! Everything request-specific travels in a [`GenerationConfig`] value;
//! nothing in this crate holds process-wide mutable settings.

pub mod chat;
pub mod composer;
pub mod session;
pub mod stream_event;

pub use chat::{ChatAgent, ChatInput};
pub use chatrelay_config::GenerationConfig;
pub use composer::{ComposedPrompt, PromptContext, compose, render_sections};
pub use session::{GenerationSession, SessionOutcome, SessionState, ThinkTagRewriter};
pub use stream_event::OutputUnit;
