//! Records exchanged with the history log and the knowledge directory.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Marker that opens a model's reasoning span in the relayed output.
pub const THINK_START_MARKER: &str = "###正在思考###";

/// Marker that closes a model's reasoning span in the relayed output.
pub const THINK_END_MARKER: &str = "###总结部分###";

/// Terminator written after every record in a daily history file.
pub const RECORD_SEPARATOR: &str = "###RECORD_SEPARATOR###";

/// One completed user/assistant exchange, as persisted to the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// When the exchange completed (local time; the log is keyed by local date)
    pub timestamp: DateTime<Local>,

    /// What the user asked
    pub user_message: String,

    /// The full relayed response, possibly still containing a reasoning span
    pub ai_response: String,
}

impl ConversationTurn {
    /// A turn stamped with the current local time.
    pub fn now(user_message: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
        }
    }

    /// The `YYYYMMDD` key of the daily file this turn belongs to.
    pub fn date_key(&self) -> String {
        self.timestamp.format("%Y%m%d").to_string()
    }
}

/// A knowledge file as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeDocument {
    /// File name, including extension
    pub identifier: String,

    /// File content, unmodified
    pub raw_text: String,
}

/// A knowledge document that scored above the match threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredMatch {
    /// File name of the matched document
    pub document_id: String,

    /// Whitespace-normalized document content
    pub content: String,

    /// Keyword score (higher is more relevant)
    pub score: u64,
}
