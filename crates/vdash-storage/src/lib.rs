//! Snapshot file storage, campaign name cache and HTTP transport.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod cache;
pub mod http;

pub use cache::{CampaignNameCache, FlushOutcome};
pub use http::{FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};

pub const CRATE_NAME: &str = "vdash-storage";

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_file_component(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Directory of pretty-printed JSON snapshots. Every write fully replaces the
/// previous file through a temp-file rename, so readers never see a torn file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        file_name: &str,
        value: &T,
    ) -> anyhow::Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing snapshot {file_name}"))?;
        self.write_bytes(file_name, &bytes).await
    }

    pub async fn write_bytes(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let target = self.path_for(file_name);
        write_atomic(&target, bytes).await?;
        Ok(target)
    }

    /// Reads a snapshot; a missing file is `Ok(None)`.
    pub async fn read_json<T: DeserializeOwned>(&self, file_name: &str) -> anyhow::Result<Option<T>> {
        let path = self.path_for(file_name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// File names in the root matching `prefix*suffix`, sorted.
    pub async fn list_files(&self, prefix: &str, suffix: &str) -> anyhow::Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("listing {}", self.root.display()));
            }
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Writes `bytes` to a sibling temp file, then renames it over `target`.
pub(crate) async fn write_atomic(target: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp snapshot file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, target).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "renaming temp snapshot {} -> {}",
                temp_path.display(),
                target.display()
            )
        });
    }
    Ok(())
}
