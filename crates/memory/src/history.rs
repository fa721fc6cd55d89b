//! Append-only daily conversation log.
//!
//! One file per local calendar day, `<dir>/<YYYYMMDD>.txt`. Each record is
//!
//! ```text
//! [2025-04-08 19:00:00] user: <message>
//! AI: <response without reasoning span>###RECORD_SEPARATOR###
//! ```
//!
//! Reading is best-effort: records that do not look like the above are
//! skipped, and a missing or unreadable file reads as empty. Content that
//! itself contains `###RECORD_SEPARATOR###` is not escaped and will split the
//! record on read.

use chatrelay_core::error::StoreError;
use chatrelay_core::record::{
    ConversationTurn, RECORD_SEPARATOR, THINK_END_MARKER, THINK_START_MARKER,
};
use chatrelay_core::text::truncate_chars;
use regex_lite::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

/// Labels that open the user part of a record. The second is the label used
/// by logs written before the English format.
const USER_LABELS: [&str; 2] = ["user:", "用户的问题:"];
const AI_LABELS: [&str; 2] = ["AI:", "AI回复:"];

static THINKING_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        "(?s){}.*?{}|<think>.*?</think>",
        regex_lite::escape(THINK_START_MARKER),
        regex_lite::escape(THINK_END_MARKER),
    );
    Regex::new(&pattern).expect("thinking-span pattern is valid")
});

/// Remove every reasoning span (marker-delimited or raw `<think>` tags),
/// non-greedy and across newlines, then trim.
pub fn strip_thinking(response: &str) -> String {
    THINKING_SPAN.replace_all(response, "").trim().to_string()
}

/// Render a turn in the on-disk record format.
pub fn format_record(turn: &ConversationTurn) -> String {
    format!(
        "[{}] {} {}\n{} {}{RECORD_SEPARATOR}\n",
        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
        USER_LABELS[0],
        turn.user_message,
        AI_LABELS[0],
        strip_thinking(&turn.ai_response),
    )
}

/// Split a daily log into records, in file order.
///
/// A record runs from a `[timestamp]` followed by a user label up to the next
/// separator (or end of text), and must contain an AI label after the user
/// label.
pub fn parse_records(text: &str) -> Vec<String> {
    text.split(RECORD_SEPARATOR)
        .filter_map(record_in_segment)
        .map(String::from)
        .collect()
}

fn record_in_segment(segment: &str) -> Option<&str> {
    let start = segment.find('[')?;
    let body = &segment[start..];
    let after_user_label = user_label_end(body)?;
    let rest = &body[after_user_label..];
    if !AI_LABELS.iter().any(|label| rest.contains(label)) {
        return None;
    }
    Some(body.trim_end())
}

/// Byte offset just past the first `]<whitespace>*<user label>` in `body`.
fn user_label_end(body: &str) -> Option<usize> {
    for (idx, _) in body.match_indices(']') {
        let after = &body[idx + 1..];
        let trimmed = after.trim_start();
        let skipped = after.len() - trimmed.len();
        if let Some(label) = USER_LABELS.iter().find(|l| trimmed.starts_with(*l)) {
            return Some(idx + 1 + skipped + label.len());
        }
    }
    None
}

/// Whether `date_key` has the `YYYYMMDD` shape of a log file name.
pub fn is_date_key(date_key: &str) -> bool {
    date_key.len() == 8 && date_key.bytes().all(|b| b.is_ascii_digit())
}

/// Today's `YYYYMMDD` key in local time.
pub fn today_key() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// The daily conversation log.
///
/// Appends to the same file are serialized through a per-path async mutex,
/// so concurrent sessions never interleave partial records.
pub struct HistoryStore {
    dir: PathBuf,
    file_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log for `date_key` (`YYYYMMDD`).
    pub fn path_for(&self, date_key: &str) -> PathBuf {
        self.dir.join(format!("{date_key}.txt"))
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.file_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Append a turn to the log of the day it was stamped with.
    pub async fn append(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::CreateDir {
                path: self.dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let path = self.path_for(&turn.date_key());
        let record = format_record(turn);
        let write_err = |e: std::io::Error| StoreError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        file.write_all(record.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        debug!(path = %path.display(), bytes = record.len(), "History record appended");
        Ok(())
    }

    /// The last `n` records of the `date_key` log, in file order.
    ///
    /// Missing, unreadable or unparseable files yield an empty list.
    pub async fn recent(&self, date_key: &str, n: usize) -> Vec<String> {
        if !is_date_key(date_key) {
            warn!(date_key, "Rejecting malformed history date key");
            return Vec::new();
        }

        let path = self.path_for(date_key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "History file does not exist");
                return Vec::new();
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read history file");
                return Vec::new();
            }
        };

        let records = parse_records(&text);
        if records.is_empty() {
            warn!(path = %path.display(), "No history records found");
            return Vec::new();
        }

        let skip = records.len().saturating_sub(n);
        records.into_iter().skip(skip).collect()
    }

    /// Like [`recent`](Self::recent), with each record cut to `max_len`
    /// characters plus `...`.
    pub async fn recent_snippets(&self, date_key: &str, n: usize, max_len: usize) -> Vec<String> {
        self.recent(date_key, n)
            .await
            .into_iter()
            .map(|record| {
                let snippet = truncate_chars(&record, max_len);
                if snippet.len() != record.len() {
                    debug!(
                        original = record.chars().count(),
                        truncated = snippet.chars().count(),
                        "History record truncated"
                    );
                }
                snippet
            })
            .collect()
    }
}
