/// History Store Module
///
/// Remembers previously published posts so they are never repeated. Keeps the
/// most recent `max_entries` texts in publish order and rewrites the whole
/// JSON array file after every change.

use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_HISTORY: usize = 1000;

#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<String>,
    index: HashSet<String>,
    max_entries: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// History that lives only in memory
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: HashSet::new(),
            max_entries: max_entries.max(1),
            path: None,
        }
    }

    /// Load persisted history. A missing or unreadable file is a cold start,
    /// never an error.
    pub async fn load(path: impl AsRef<Path>, max_entries: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::in_memory(max_entries);

        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(texts) => {
                    for text in texts {
                        store.insert(text);
                    }
                    log::info!(
                        "Loaded {} previously posted texts from {}",
                        store.len(),
                        path.display()
                    );
                }
                Err(e) => {
                    log::warn!(
                        "History file {} is not a JSON string array ({}); starting empty",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No history at {}; starting fresh", path.display());
            }
            Err(e) => {
                log::warn!("Could not read history {}: {}; starting empty", path.display(), e);
            }
        }

        store.path = Some(path);
        store
    }

    pub fn contains(&self, text: &str) -> bool {
        self.index.contains(text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Add `text` as the newest entry, evict the oldest beyond the bound, then
    /// persist. Re-recording a known text moves it to the newest position.
    pub async fn record(&mut self, text: &str) -> Result<()> {
        self.insert(text.to_string());
        self.persist().await
    }

    fn insert(&mut self, text: String) {
        if self.index.contains(&text) {
            self.entries.retain(|existing| existing != &text);
        } else {
            self.index.insert(text.clone());
        }
        self.entries.push_back(text);

        while self.entries.len() > self.max_entries {
            if let Some(evicted) = self.entries.pop_front() {
                self.index.remove(&evicted);
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string(&self.entries).context("Failed to serialize history")?;

        // Write beside the target and rename so a crash never leaves half a file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write history to {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace history file {}", path.display()))?;

        log::debug!("Persisted {} history entries", self.entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json"), 10).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = HistoryStore::load(&path, 10).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_persists_and_reloads_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let mut store = HistoryStore::load(&path, 10).await;
        store.record("first").await.unwrap();
        store.record("second").await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"["first","second"]"#);

        let reloaded = HistoryStore::load(&path, 10).await;
        assert!(reloaded.contains("first"));
        assert!(reloaded.contains("second"));
        assert_eq!(reloaded.entries().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_size_never_exceeds_bound() {
        let mut store = HistoryStore::in_memory(3);
        for i in 0..20 {
            store.record(&format!("post {i}")).await.unwrap();
            assert!(store.len() <= 3);
        }

        assert_eq!(
            store.entries().collect::<Vec<_>>(),
            vec!["post 17", "post 18", "post 19"]
        );
        assert!(!store.contains("post 16"));
    }

    #[tokio::test]
    async fn test_load_truncates_oversized_file_to_newest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, r#"["a","b","c","d"]"#).unwrap();

        let store = HistoryStore::load(&path, 2).await;
        assert_eq!(store.entries().collect::<Vec<_>>(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_rerecording_keeps_entries_unique() {
        let mut store = HistoryStore::in_memory(5);
        store.record("fallback").await.unwrap();
        store.record("other").await.unwrap();
        store.record("fallback").await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.entries().collect::<Vec<_>>(), vec!["other", "fallback"]);
    }
}
