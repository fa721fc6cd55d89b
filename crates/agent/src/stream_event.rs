//! Units written to the client during a generation session.
//!
//! The body sent to the browser is plain text, not SSE frames. Each unit
//! renders to the exact text the client concatenates.

use chatrelay_core::record::RECORD_SEPARATOR;
use serde::Serialize;

pub const BANNER: &str = "\n\n📌 正在参考以下信息：\n\n";
pub const THINKING_HEADER: &str = "💡 AI思考过程：\n";

/// One piece of the streamed response, in emission order:
/// `Banner`, any number of `Section`s, `ThinkingHeader`, `Token`s, and on
/// failure a final `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutputUnit {
    Banner,

    /// A context section echoed back to the user.
    Section(String),

    ThinkingHeader,

    /// Model output after think-tag substitution.
    Token(String),

    /// The generation failed; always the last unit.
    Error(String),
}

impl OutputUnit {
    /// Short name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Section(_) => "section",
            Self::ThinkingHeader => "thinking_header",
            Self::Token(_) => "token",
            Self::Error(_) => "error",
        }
    }

    /// The text written to the response body.
    pub fn render(&self) -> String {
        match self {
            Self::Banner => BANNER.to_string(),
            Self::Section(s) => format!("{}\n\n", s.replace(RECORD_SEPARATOR, "")),
            Self::ThinkingHeader => THINKING_HEADER.to_string(),
            Self::Token(t) => t.clone(),
            Self::Error(e) => format!("[ERROR] {e}\n\n"),
        }
    }
}
