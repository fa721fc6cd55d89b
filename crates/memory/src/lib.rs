//! Flat-file stores for ChatRelay.
//!
//! - [`HistoryStore`]: append-only daily conversation logs
//!   (`<dir>/<YYYYMMDD>.txt`) and retrieval of the most recent records.
//! - [`KnowledgeMatcher`]: keyword scoring of `.txt` files in a knowledge
//!   directory against a query, re-scanned on every call.
//!
//! Both degrade to empty results when their directory or file is missing.

pub mod history;
pub mod knowledge;

pub use history::{HistoryStore, parse_records, strip_thinking};
pub use knowledge::{KnowledgeMatcher, score_identifier};
