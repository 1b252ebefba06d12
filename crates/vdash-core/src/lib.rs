//! Core domain model for the call-center bridge.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

pub mod parse;

pub use parse::{parse, parse_rows, Delimiter, Parsed};

pub const CRATE_NAME: &str = "vdash-core";

/// One parsed data row: header name -> raw string value, in header order.
///
/// Keys are unique. Re-inserting a key keeps its original position and replaces
/// the value, so a duplicated header column resolves to its last occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteRecord {
    fields: Vec<(String, String)>,
}

impl RemoteRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value at a column position (after duplicate-key collapsing).
    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First candidate key whose value is non-blank, trimmed.
    pub fn first_present(&self, candidates: &[&str]) -> Option<&str> {
        candidates
            .iter()
            .filter_map(|key| self.get(key))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RemoteRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RemoteRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for RemoteRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRef {
    pub id: String,
    pub name: String,
}

impl CampaignRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One agent's campaign assignments as of a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCampaignSnapshot {
    pub agent_user: String,
    pub agent_name: Option<String>,
    pub user_group: Option<String>,
    pub campaigns: Vec<CampaignRef>,
    pub count_campaigns: usize,
    pub last_synced: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentCampaignSnapshot {
    /// Builds a snapshot, dropping repeated campaign ids (first occurrence wins).
    pub fn new(
        agent_user: impl Into<String>,
        agent_name: Option<String>,
        user_group: Option<String>,
        campaigns: Vec<CampaignRef>,
        last_synced: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::new();
        let campaigns: Vec<CampaignRef> = campaigns
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
        Self {
            agent_user: agent_user.into(),
            agent_name,
            user_group,
            count_campaigns: campaigns.len(),
            campaigns,
            last_synced,
            error: None,
        }
    }

    pub fn empty(
        agent_user: impl Into<String>,
        agent_name: Option<String>,
        user_group: Option<String>,
        last_synced: DateTime<Utc>,
    ) -> Self {
        Self::new(agent_user, agent_name, user_group, Vec::new(), last_synced)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn campaign_ids(&self) -> impl Iterator<Item = &str> {
        self.campaigns.iter().map(|c| c.id.as_str())
    }
}

/// Full sync pass keyed by `agent_user`. Replaced wholesale on every pass.
pub type ConsolidatedSnapshot = BTreeMap<String, AgentCampaignSnapshot>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSyncError {
    pub agent: String,
    pub error: String,
}

/// Tallies produced by one persistence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub agents_created: usize,
    pub agents_updated: usize,
    pub campaigns_created: usize,
    pub campaigns_updated: usize,
    pub relations_created: usize,
    pub relations_removed: usize,
    pub errors: Vec<AgentSyncError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap()
    }

    #[test]
    fn duplicate_keys_keep_first_position_and_last_value() {
        let record: RemoteRecord = [("id", "1"), ("name", "a"), ("id", "2")].into_iter().collect();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("id"), Some("2"));
        assert_eq!(record.value_at(1), Some("a"));
    }

    #[test]
    fn record_serializes_in_header_order() {
        let record: RemoteRecord = [("zeta", "1"), ("alpha", "2")].into_iter().collect();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"zeta":"1","alpha":"2"}"#);
    }

    #[test]
    fn first_present_skips_blank_candidates() {
        let record: RemoteRecord = [("campaign_name", "  "), ("Campaign Name", " Sales ")]
            .into_iter()
            .collect();
        assert_eq!(
            record.first_present(&["campaign_name", "Campaign Name"]),
            Some("Sales")
        );
        assert_eq!(record.first_present(&["missing"]), None);
    }

    #[test]
    fn snapshot_dedupes_campaign_ids() {
        let snap = AgentCampaignSnapshot::new(
            "agt1",
            None,
            None,
            vec![
                CampaignRef::new("c1", "Sales"),
                CampaignRef::new("c2", "Support"),
                CampaignRef::new("c1", "Sales again"),
            ],
            ts(),
        );
        assert_eq!(snap.count_campaigns, 2);
        assert_eq!(snap.campaign_ids().collect::<Vec<_>>(), vec!["c1", "c2"]);
        assert_eq!(snap.campaigns[0].name, "Sales");
    }

    #[test]
    fn error_annotation_is_omitted_when_absent() {
        let snap = AgentCampaignSnapshot::empty("agt1", None, None, ts());
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.get("error").is_none());
        let failed = snap.with_error("boom");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["error"], "boom");
        assert_eq!(value["count_campaigns"], 0);
    }

    #[test]
    fn stats_serialize_camel_case() {
        let value = serde_json::to_value(SyncStats::default()).unwrap();
        assert_eq!(value["relationsRemoved"], 0);
        assert!(value["errors"].as_array().unwrap().is_empty());
    }
}
