//! Static campaign id -> name map files kept next to the snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use vdash_core::RemoteRecord;

use crate::fields::{campaign_entry_from_row, CAMPAIGN_MAP_PAIRS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignMap {
    pub path: PathBuf,
    pub entries: BTreeMap<String, String>,
}

/// Loads the first readable candidate. Missing, unreadable and corrupt files
/// are skipped; `None` means no candidate could be used.
pub async fn load_campaign_map(candidates: &[PathBuf]) -> Option<CampaignMap> {
    for path in candidates {
        match read_map_file(path).await {
            Ok(Some(entries)) => {
                debug!(path = %path.display(), entries = entries.len(), "loaded local campaign map");
                return Some(CampaignMap {
                    path: path.clone(),
                    entries,
                });
            }
            Ok(None) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable campaign map");
            }
        }
    }
    None
}

async fn read_map_file(path: &Path) -> anyhow::Result<Option<BTreeMap<String, String>>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let value: JsonValue =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(campaign_map_from_json(&value)))
}

/// Accepts either an array of campaign rows or a flat `{id: name}` object.
pub fn campaign_map_from_json(value: &JsonValue) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    match value {
        JsonValue::Array(items) => {
            for item in items {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                for (id_key, name_key) in CAMPAIGN_MAP_PAIRS {
                    let id = obj.get(*id_key).and_then(json_text);
                    let name = obj.get(*name_key).and_then(json_text);
                    if let (Some(id), Some(name)) = (id, name) {
                        map.insert(id, name);
                        break;
                    }
                }
            }
        }
        JsonValue::Object(obj) => {
            for (id, name) in obj {
                if let Some(name) = json_text(name) {
                    map.insert(id.trim().to_string(), name);
                }
            }
        }
        _ => {}
    }
    map
}

/// (id, name) pairs from a parsed `campaigns_list` reply, in row order.
pub fn campaign_entries_from_rows(rows: &[RemoteRecord]) -> Vec<(String, String)> {
    rows.iter().filter_map(campaign_entry_from_row).collect()
}

fn json_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
