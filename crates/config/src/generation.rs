//! Per-request generation settings.
//!
//! Every chat request carries a `settings` object. It is overlaid on the
//! [`GenerationDefaults`] from the config file to produce a
//! [`GenerationConfig`] that is passed by value through the prompt composer
//! and the generation session. Nothing here is process-wide mutable state.

use serde::{Deserialize, Serialize};

/// Server-side defaults (the `[generation]` table of `config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_history_count")]
    pub history_count: usize,

    #[serde(default = "default_history_max_len")]
    pub history_max_len: usize,

    #[serde(default = "default_knowledge_max_results")]
    pub knowledge_max_results: usize,

    #[serde(default = "default_knowledge_snippet_max_len")]
    pub knowledge_snippet_max_len: usize,

    #[serde(default = "default_function_output_max_len")]
    pub function_output_max_len: usize,

    /// Knowledge documents scoring at or below this are discarded.
    #[serde(default = "default_knowledge_threshold")]
    pub knowledge_threshold: u64,
}

fn default_model_name() -> String {
    "deepseek-r1:8b".into()
}
fn default_history_count() -> usize {
    2
}
fn default_history_max_len() -> usize {
    200
}
fn default_knowledge_max_results() -> usize {
    2
}
fn default_knowledge_snippet_max_len() -> usize {
    150
}
fn default_function_output_max_len() -> usize {
    150
}
fn default_knowledge_threshold() -> u64 {
    15
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            history_count: default_history_count(),
            history_max_len: default_history_max_len(),
            knowledge_max_results: default_knowledge_max_results(),
            knowledge_snippet_max_len: default_knowledge_snippet_max_len(),
            function_output_max_len: default_function_output_max_len(),
            knowledge_threshold: default_knowledge_threshold(),
        }
    }
}

/// The `settings` object of a `POST /api/chat` body.
///
/// Field names follow the browser client's wire format. Absent fields fall
/// back to the server defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Number of history records to include
    #[serde(default)]
    pub re_chatlist: Option<usize>,

    /// Max characters per history record
    #[serde(default)]
    pub max_history_length: Option<usize>,

    /// Number of knowledge matches to include
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Max characters per knowledge snippet
    #[serde(default)]
    pub re_max_listku: Option<usize>,

    /// Max characters of the function-execution result
    #[serde(default)]
    pub max_func_length: Option<usize>,

    /// Model name
    #[serde(default)]
    pub modname: Option<String>,
}

/// Settings for one generation, resolved once at request entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model_name: String,
    pub history_count: usize,
    pub history_max_len: usize,
    pub knowledge_max_results: usize,
    pub knowledge_snippet_max_len: usize,
    pub function_output_max_len: usize,
}

impl GenerationConfig {
    /// Overlay request settings on server defaults.
    pub fn resolve(defaults: &GenerationDefaults, settings: &ChatSettings) -> Self {
        let model_name = settings
            .modname
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .unwrap_or_else(|| defaults.model_name.clone());

        Self {
            model_name,
            history_count: settings.re_chatlist.unwrap_or(defaults.history_count),
            history_max_len: settings
                .max_history_length
                .unwrap_or(defaults.history_max_len),
            knowledge_max_results: settings
                .max_results
                .unwrap_or(defaults.knowledge_max_results),
            knowledge_snippet_max_len: settings
                .re_max_listku
                .unwrap_or(defaults.knowledge_snippet_max_len),
            function_output_max_len: settings
                .max_func_length
                .unwrap_or(defaults.function_output_max_len),
        }
    }
}

impl From<&GenerationDefaults> for GenerationConfig {
    fn from(defaults: &GenerationDefaults) -> Self {
        Self::resolve(defaults, &ChatSettings::default())
    }
}
