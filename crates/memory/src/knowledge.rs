//! Keyword relevance matching over a directory of `.txt` documents.
//!
//! Only the file name is scored; the content is read for the survivors.
//! The directory is re-scanned on every call so edits are picked up without
//! a restart.

use chatrelay_core::record::{KnowledgeDocument, ScoredMatch};
use chatrelay_core::text::collapse_whitespace;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Score a document stem against a query.
///
/// Each distinct character of the lowercased query contributes twice its
/// occurrence count in the lowercased stem; each whitespace-separated query
/// word found inside the stem adds three times its character length.
pub fn score_identifier(query: &str, stem: &str) -> u64 {
    let query = query.to_lowercase();
    let stem = stem.to_lowercase();

    let distinct: HashSet<char> = query.chars().collect();
    let char_score: u64 = distinct
        .iter()
        .map(|c| stem.chars().filter(|s| s == c).count() as u64 * 2)
        .sum();

    let word_score: u64 = query
        .split_whitespace()
        .filter(|w| stem.contains(w))
        .map(|w| w.chars().count() as u64 * 3)
        .sum();

    char_score + word_score
}

/// Scores the knowledge directory against user queries.
#[derive(Debug, Clone)]
pub struct KnowledgeMatcher {
    dir: PathBuf,
    threshold: u64,
}

impl KnowledgeMatcher {
    /// `threshold` is exclusive: a document must score above it.
    pub fn new(dir: impl Into<PathBuf>, threshold: u64) -> Self {
        Self {
            dir: dir.into(),
            threshold,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return at most `limit` matches, best first.
    ///
    /// Equal scores come back in ascending file-name order. A missing or
    /// empty directory yields an empty list.
    pub async fn find(&self, query: &str, limit: usize) -> Vec<ScoredMatch> {
        let names = match self.list_documents().await {
            Ok(names) if names.is_empty() => {
                warn!(dir = %self.dir.display(), "Knowledge directory is empty");
                return Vec::new();
            }
            Ok(names) => names,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot open knowledge directory");
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for name in names {
            let stem = name.strip_suffix(".txt").unwrap_or(&name);
            let score = score_identifier(query, stem);
            if score <= self.threshold {
                continue;
            }

            let Some(doc) = self.read_document(&name).await else {
                continue;
            };
            let content = collapse_whitespace(&doc.raw_text);
            if content.is_empty() {
                debug!(document = %doc.identifier, "Skipping empty knowledge document");
                continue;
            }

            debug!(document = %doc.identifier, score, "Knowledge document matched");
            matches.push(ScoredMatch {
                document_id: doc.identifier,
                content,
                score,
            });
        }

        // Stable: names were sorted, so ties keep file-name order
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(limit);
        matches
    }

    /// `.txt` file names in the directory, sorted.
    async fn list_documents(&self) -> std::io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry
                        .file_type()
                        .await
                        .map(|t| t.is_file())
                        .unwrap_or(false);
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if is_file && name.ends_with(".txt") {
                        names.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(dir = %self.dir.display(), error = %e, "Error while listing knowledge directory");
                    break;
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_document(&self, name: &str) -> Option<KnowledgeDocument> {
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw_text) => Some(KnowledgeDocument {
                identifier: name.to_string(),
                raw_text,
            }),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read knowledge document");
                None
            }
        }
    }
}
