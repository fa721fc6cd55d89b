//! Inference backend clients for ChatRelay.
//!
//! All providers implement the `chatrelay_core::Provider` trait.
//! [`build_from_config`] selects one based on `backend.kind`.

mod lines;
pub mod ollama;
pub mod openai_compat;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;

use chatrelay_config::{AppConfig, BackendKind};
use chatrelay_core::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured backend client.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let base_url = config.backend.resolved_base_url();
    let timeout = Duration::from_secs(config.backend.request_timeout_secs);

    tracing::debug!(kind = ?config.backend.kind, base_url = %base_url, "Building inference provider");

    match config.backend.kind {
        BackendKind::Ollama => {
            Arc::new(OllamaProvider::new(base_url).with_request_timeout(timeout))
        }
        BackendKind::OpenAiCompat => Arc::new(
            OpenAiCompatProvider::new("openai_compat", base_url, config.backend.api_key.clone())
                .with_request_timeout(timeout),
        ),
    }
}
