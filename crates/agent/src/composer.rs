//! Prompt composition.
//!
//! Builds the single user message sent to the model from the user's text,
//! recent history, knowledge matches and an optional function result.

use chatrelay_config::GenerationConfig;
use chatrelay_core::record::ScoredMatch;
use chatrelay_core::text::truncate_chars;
use tracing::debug;

/// Everything gathered for one request before prompting.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub user_message: String,
    /// Already truncated by the history store.
    pub history_snippets: Vec<String>,
    pub knowledge_matches: Vec<ScoredMatch>,
    pub function_result: Option<String>,
}

/// The composed prompt plus the sections it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub prompt: String,
    /// History and knowledge sections, echoed to the user in the banner.
    pub sections: Vec<String>,
}

/// Render the history and knowledge sections in prompt order.
///
/// Knowledge sections keep the match's position in their label, so a blank
/// match leaves a gap in the numbering.
pub fn render_sections(ctx: &PromptContext, config: &GenerationConfig) -> Vec<String> {
    let mut sections = Vec::new();

    for (i, snippet) in ctx.history_snippets.iter().enumerate() {
        sections.push(format!("[历史对话 {}]:\n{snippet}", i + 1));
    }

    for (i, m) in ctx.knowledge_matches.iter().enumerate() {
        let content = truncate_chars(&m.content, config.knowledge_snippet_max_len);
        if content.trim().is_empty() {
            continue;
        }
        if content.len() != m.content.len() {
            debug!(
                document = %m.document_id,
                original = m.content.chars().count(),
                "Knowledge snippet truncated"
            );
        }
        sections.push(format!(
            "[数据库资料 {} - {} (关联性: {:.2})]:\n{content}",
            i + 1,
            m.document_id,
            m.score as f64
        ));
    }

    sections
}

pub fn compose(ctx: &PromptContext, config: &GenerationConfig) -> ComposedPrompt {
    let sections = render_sections(ctx, config);
    let joined = sections.join("\n\n");

    let function_result = ctx
        .function_result
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| truncate_chars(r, config.function_output_max_len));

    let prompt = match function_result {
        Some(result) => format!(
            "{}\n\n[函数执行结果]:\n{result}\n\n{joined}",
            ctx.user_message
        ),
        None if !joined.is_empty() => format!("{}\n\n{joined}", ctx.user_message),
        None => ctx.user_message.clone(),
    };

    ComposedPrompt { prompt, sections }
}
