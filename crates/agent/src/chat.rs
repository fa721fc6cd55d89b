//! Request-level orchestration: gather context, compose, start a session.

use crate::composer::{ComposedPrompt, PromptContext, compose};
use crate::session::GenerationSession;
use chatrelay_config::GenerationConfig;
use chatrelay_core::cancel::CancellationSignal;
use chatrelay_core::provider::Provider;
use chatrelay_memory::history::today_key;
use chatrelay_memory::{HistoryStore, KnowledgeMatcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One chat turn as received from the client.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    /// Include today's recent conversation records.
    pub use_memory: bool,
    /// Include knowledge directory matches.
    pub use_database: bool,
    /// Output of a client-side function, if one ran.
    pub function_result: Option<String>,
}

/// Shared, long-lived parts of the chat pipeline.
pub struct ChatAgent {
    provider: Arc<dyn Provider>,
    history: Arc<HistoryStore>,
    knowledge: Arc<KnowledgeMatcher>,
    chunk_timeout: Duration,
}

impl ChatAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        history: Arc<HistoryStore>,
        knowledge: Arc<KnowledgeMatcher>,
    ) -> Self {
        Self {
            provider,
            history,
            knowledge,
            chunk_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeMatcher> {
        &self.knowledge
    }

    /// Collect history and knowledge for `input` as enabled by its flags.
    pub async fn gather(&self, input: &ChatInput, config: &GenerationConfig) -> PromptContext {
        let history_snippets = if input.use_memory {
            self.history
                .recent_snippets(&today_key(), config.history_count, config.history_max_len)
                .await
        } else {
            Vec::new()
        };

        let knowledge_matches = if input.use_database {
            self.knowledge
                .find(&input.message, config.knowledge_max_results)
                .await
        } else {
            Vec::new()
        };

        debug!(
            history = history_snippets.len(),
            knowledge = knowledge_matches.len(),
            "Prompt context gathered"
        );

        PromptContext {
            user_message: input.message.clone(),
            history_snippets,
            knowledge_matches,
            function_result: input.function_result.clone(),
        }
    }

    /// Gather context and compose the prompt.
    pub async fn prepare(&self, input: &ChatInput, config: &GenerationConfig) -> ComposedPrompt {
        let ctx = self.gather(input, config).await;
        compose(&ctx, config)
    }

    /// A new session bound to this agent's provider and history.
    pub fn session(
        &self,
        id: impl Into<String>,
        signal: Arc<CancellationSignal>,
        broadcast: Arc<CancellationSignal>,
    ) -> GenerationSession {
        GenerationSession::new(id, self.provider.clone(), self.history.clone(), signal)
            .with_broadcast(broadcast)
            .with_chunk_timeout(self.chunk_timeout)
    }
}
