//! Process-wide campaign id -> display name cache with best-effort disk mirror.
//!
//! Entries never expire. The on-disk copy has no delivery guarantee: a failed
//! flush is logged and counted, never returned to the caller that inserted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    Failed,
    /// Cache has no backing file.
    Skipped,
}

#[derive(Debug, Default)]
pub struct CampaignNameCache {
    entries: RwLock<HashMap<String, String>>,
    path: Option<PathBuf>,
    flush_attempts: AtomicUsize,
    flush_failures: AtomicUsize,
}

impl CampaignNameCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Empty cache mirrored to `path` on flush.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Restores the cache from `path`. A missing or corrupt file yields an empty cache.
    pub async fn load_from_disk(path: impl Into<PathBuf>) -> Self {
        let cache = Self::with_path(path);
        if let Some(path) = &cache.path {
            match read_entries(path).await {
                Ok(Some(entries)) => {
                    debug!(path = %path.display(), entries = entries.len(), "restored campaign name cache");
                    *cache.entries.write() = entries;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unreadable campaign name cache");
                }
            }
        }
        cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Inserts or replaces; returns true when `id` was not cached before.
    pub fn set(&self, id: impl Into<String>, name: impl Into<String>) -> bool {
        self.entries.write().insert(id.into(), name.into()).is_none()
    }

    /// Inserts only when `id` is absent; returns true when inserted.
    pub fn set_if_absent(&self, id: impl Into<String>, name: impl Into<String>) -> bool {
        let mut entries = self.entries.write();
        let id = id.into();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, name.into());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Writes the whole cache to its backing file, propagating I/O errors.
    pub async fn flush_to_disk(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.snapshot())
            .context("serializing campaign name cache")?;
        write_atomic(path, &bytes).await
    }

    /// Like [`flush_to_disk`](Self::flush_to_disk) but never fails.
    pub async fn flush_best_effort(&self) -> FlushOutcome {
        if self.path.is_none() {
            return FlushOutcome::Skipped;
        }
        self.flush_attempts.fetch_add(1, Ordering::Relaxed);
        match self.flush_to_disk().await {
            Ok(()) => FlushOutcome::Written,
            Err(err) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "campaign name cache flush failed");
                FlushOutcome::Failed
            }
        }
    }

    pub fn flush_attempts(&self) -> usize {
        self.flush_attempts.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> usize {
        self.flush_failures.load(Ordering::Relaxed)
    }
}

async fn read_entries(path: &Path) -> anyhow::Result<Option<HashMap<String, String>>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    if text.trim().is_empty() {
        return Ok(Some(HashMap::new()));
    }
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(
        raw.into_iter()
            .map(|(k, v)| {
                let name = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, name)
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_reports_new_insertions() {
        let cache = CampaignNameCache::in_memory();
        assert!(cache.set("c1", "Sales"));
        assert!(!cache.set("c1", "Sales 2"));
        assert_eq!(cache.get("c1").as_deref(), Some("Sales 2"));

        assert!(!cache.set_if_absent("c1", "ignored"));
        assert!(cache.set_if_absent("c2", "Support"));
        assert_eq!(cache.get("c1").as_deref(), Some("Sales 2"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn flush_then_load_restores_entries() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("campaign_name_cache.json");

        let cache = CampaignNameCache::with_path(&path);
        cache.set("c1", "Sales");
        cache.set("c2", "Support");
        assert_eq!(cache.flush_best_effort().await, FlushOutcome::Written);
        assert_eq!(cache.flush_attempts(), 1);

        let restored = CampaignNameCache::load_from_disk(&path).await;
        assert_eq!(restored.get("c2").as_deref(), Some("Support"));
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_or_missing_file_yields_empty_cache() {
        let dir = tempdir().expect("tempdir");
        let missing = CampaignNameCache::load_from_disk(dir.path().join("none.json")).await;
        assert!(missing.is_empty());

        let corrupt_path = dir.path().join("bad.json");
        std::fs::write(&corrupt_path, "{not json").unwrap();
        let corrupt = CampaignNameCache::load_from_disk(&corrupt_path).await;
        assert!(corrupt.is_empty());
        assert_eq!(corrupt.path(), Some(corrupt_path.as_path()));
    }

    #[tokio::test]
    async fn non_string_values_are_stringified_on_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"100": 42, "c1": "Sales"}"#).unwrap();
        let cache = CampaignNameCache::load_from_disk(&path).await;
        assert_eq!(cache.get("100").as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn failed_flush_is_swallowed_and_counted() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let cache = CampaignNameCache::with_path(blocker.join("cache.json"));
        cache.set("c1", "Sales");
        assert_eq!(cache.flush_best_effort().await, FlushOutcome::Failed);
        assert_eq!(cache.flush_attempts(), 1);
        assert_eq!(cache.flush_failures(), 1);
        assert_eq!(cache.get("c1").as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn in_memory_cache_skips_flush() {
        let cache = CampaignNameCache::in_memory();
        assert_eq!(cache.flush_best_effort().await, FlushOutcome::Skipped);
        assert_eq!(cache.flush_attempts(), 0);
    }
}
