//! Agent-campaign reconciliation: roster, name seeding, per-agent pass and
//! the snapshot files written from it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use vdash_adapters::campaign_map::{campaign_entries_from_rows, load_campaign_map};
use vdash_adapters::codes::{agent_campaign_line, campaign_codes, is_empty_or_error};
use vdash_adapters::fields::{
    agent_name_from_info, agent_user_from_row, AGENT_NAME_FIELDS, STATS_AGENT_NAME_FIELDS,
    USER_GROUP_FIELDS,
};
use vdash_adapters::functions::{AGENT_CAMPAIGNS, AGENT_INFO, AGENT_STATS_EXPORT, CAMPAIGNS_LIST};
use vdash_adapters::time::{normalize_remote_datetime, trailing_window};
use vdash_adapters::{Credentials, GatewayError, RemoteApi, RemoteCall};
use vdash_core::{parse, AgentCampaignSnapshot, CampaignRef, ConsolidatedSnapshot, RemoteRecord};
use vdash_storage::{sanitize_file_component, CampaignNameCache, SnapshotStore};

pub const CONSOLIDATED_FILE: &str = "all_agents_campaigns.json";
pub const LIVE_AGENT_FILE: &str = "agent_campaigns.json";
pub const AGENT_FILE_PREFIX: &str = "agent_campaigns_";

const NAME_FALLBACK_DAYS: i64 = 30;

pub fn agent_file_name(agent_user: &str) -> String {
    format!("{AGENT_FILE_PREFIX}{}.json", sanitize_file_component(agent_user))
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync pass is already running")]
    AlreadyRunning,
    #[error("VICIdial API error: {0}")]
    Roster(#[source] GatewayError),
    #[error("snapshot write failed: {0:#}")]
    Io(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub roster_days: i64,
    pub pace_every: usize,
    pub pace_delay: Duration,
    pub campaign_map_paths: Vec<PathBuf>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            roster_days: 90,
            pace_every: 5,
            pace_delay: Duration::from_millis(100),
            campaign_map_paths: Vec::new(),
        }
    }
}

/// Caller-supplied knobs for one pass: roster window bounds and credentials
/// overriding the gateway defaults.
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    LocalMap,
    RemoteList,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub agents_processed: usize,
    pub total_agents: usize,
    pub total_campaigns: usize,
    pub seed_source: SeedSource,
    pub results: ConsolidatedSnapshot,
}

/// Result of the live single-agent view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveAgentCampaigns {
    pub agent_user: String,
    pub agent_name: Option<String>,
    pub campaigns: Vec<CampaignRef>,
    pub ingroups: Vec<String>,
    pub count_campaigns: usize,
    pub count_ingroups: usize,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountsSource {
    Consolidated,
    IndividualFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignCounts {
    pub counts: BTreeMap<String, u64>,
    pub source: Option<CountsSource>,
}

fn with_credentials(call: RemoteCall, credentials: &Credentials) -> RemoteCall {
    call.param_opt("user", credentials.user.clone())
        .param_opt("pass", credentials.pass.clone())
}

fn agent_campaigns_call(agent_user: &str, credentials: &Credentials) -> RemoteCall {
    let call = RemoteCall::new(AGENT_CAMPAIGNS)
        .param("agent_user", agent_user)
        .param("ignore_agentdirect", "N")
        .pipe_with_header();
    with_credentials(call, credentials)
}

#[derive(Clone)]
pub struct Reconciler {
    remote: Arc<dyn RemoteApi>,
    cache: Arc<CampaignNameCache>,
    snapshots: SnapshotStore,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        cache: Arc<CampaignNameCache>,
        snapshots: SnapshotStore,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            remote,
            cache,
            snapshots,
            settings,
        }
    }

    /// One full pass. Only a failed roster call or a failed consolidated
    /// write aborts; per-agent problems become annotated empty snapshots.
    pub async fn reconcile_all(&self, request: &SyncRequest) -> Result<ReconcileOutcome, SyncError> {
        let roster = self.fetch_roster(request).await.map_err(SyncError::Roster)?;
        info!(agents = roster.len(), "roster received");

        let seed_source = self.seed_names().await;

        let mut results = ConsolidatedSnapshot::new();
        let mut processed = 0usize;
        for row in &roster {
            let Some(agent_user) = agent_user_from_row(row) else {
                continue;
            };
            let agent_name = row.first_present(AGENT_NAME_FIELDS).map(ToString::to_string);
            let user_group = row.first_present(USER_GROUP_FIELDS).map(ToString::to_string);
            let now = Utc::now();

            let call = agent_campaigns_call(&agent_user, &request.credentials);
            let mut fetched = false;
            let snapshot = match self.remote.call(call).await {
                Ok(raw) if !is_empty_or_error(&raw) => {
                    let campaigns = campaign_codes(&raw)
                        .into_iter()
                        .map(|id| {
                            let name = self.cache.get(&id).unwrap_or_else(|| id.clone());
                            CampaignRef::new(id, name)
                        })
                        .collect();
                    fetched = true;
                    AgentCampaignSnapshot::new(agent_user.as_str(), agent_name, user_group, campaigns, now)
                }
                Ok(_) | Err(GatewayError::Remote(_)) => {
                    debug!(agent_user = %agent_user, "no campaigns reported");
                    AgentCampaignSnapshot::empty(agent_user.as_str(), agent_name, user_group, now)
                }
                Err(err) => {
                    warn!(agent_user = %agent_user, error = %err, "agent campaign fetch failed");
                    let failed = AgentCampaignSnapshot::empty(agent_user.as_str(), agent_name, user_group, now)
                        .with_error(err.to_string());
                    results.insert(agent_user, failed);
                    continue;
                }
            };

            if let Err(err) = self
                .snapshots
                .write_json(&agent_file_name(&agent_user), &snapshot)
                .await
            {
                warn!(agent_user = %agent_user, error = %err, "agent snapshot write failed");
            }
            results.insert(agent_user, snapshot);

            if fetched {
                processed += 1;
                if self.should_pause(processed) {
                    tokio::time::sleep(self.settings.pace_delay).await;
                }
            }
        }

        self.snapshots
            .write_json(CONSOLIDATED_FILE, &results)
            .await
            .map_err(SyncError::Io)?;

        let total_campaigns = results.values().map(|s| s.count_campaigns).sum();
        info!(
            processed,
            total_agents = roster.len(),
            total_campaigns,
            "agent campaigns reconciled"
        );
        Ok(ReconcileOutcome {
            agents_processed: processed,
            total_agents: roster.len(),
            total_campaigns,
            seed_source,
            results,
        })
    }

    fn should_pause(&self, processed: usize) -> bool {
        self.settings.pace_every > 0
            && processed % self.settings.pace_every == 0
            && !self.settings.pace_delay.is_zero()
    }

    /// Roster rows from `agent_stats_export` over the requested window,
    /// defaulting to the trailing `roster_days` ending now.
    pub async fn fetch_roster(&self, request: &SyncRequest) -> Result<Vec<RemoteRecord>, GatewayError> {
        let (default_start, default_end) =
            trailing_window(Local::now().naive_local(), self.settings.roster_days);
        let start = request
            .start
            .as_deref()
            .map(normalize_remote_datetime)
            .unwrap_or(default_start);
        let end = request
            .end
            .as_deref()
            .map(normalize_remote_datetime)
            .unwrap_or(default_end);

        let call = RemoteCall::new(AGENT_STATS_EXPORT)
            .param("DB", "0")
            .pipe_with_header()
            .param("time_format", "HF")
            .param("datetime_start", start)
            .param("datetime_end", end);
        let raw = self.remote.call(with_credentials(call, &request.credentials)).await?;
        Ok(parse(&raw).map(|p| p.into_rows()).unwrap_or_default())
    }

    /// Fills the cache from the local map or, without one, a single bulk
    /// `campaigns_list` call. Existing entries are never replaced.
    pub async fn seed_names(&self) -> SeedSource {
        let source = if let Some(map) = load_campaign_map(&self.settings.campaign_map_paths).await {
            let added = map
                .entries
                .iter()
                .filter(|(id, name)| self.cache.set_if_absent(id.as_str(), name.as_str()))
                .count();
            info!(path = %map.path.display(), entries = map.entries.len(), added, "seeded names from local map");
            SeedSource::LocalMap
        } else {
            match self.fetch_all_campaigns().await {
                Ok(entries) => {
                    let added = entries
                        .iter()
                        .filter(|(id, name)| self.cache.set_if_absent(id.as_str(), name.as_str()))
                        .count();
                    info!(fetched = entries.len(), added, "seeded names from campaign list");
                    SeedSource::RemoteList
                }
                Err(err) => {
                    warn!(error = %err, "bulk campaign list failed; ids will stand in for names");
                    SeedSource::Unavailable
                }
            }
        };
        self.cache.flush_best_effort().await;
        source
    }

    async fn fetch_all_campaigns(&self) -> Result<Vec<(String, String)>, GatewayError> {
        let raw = self
            .remote
            .call(RemoteCall::new(CAMPAIGNS_LIST).pipe_with_header())
            .await?;
        let rows = parse(&raw).map(|p| p.into_rows()).unwrap_or_default();
        Ok(campaign_entries_from_rows(&rows))
    }

    /// Live view of one agent straight from the remote API. An error reply
    /// is returned as `GatewayError::Remote` with the trimmed body.
    pub async fn reconcile_single(
        &self,
        agent_user: &str,
        credentials: &Credentials,
    ) -> Result<LiveAgentCampaigns, GatewayError> {
        let raw = self.remote.call(agent_campaigns_call(agent_user, credentials)).await?;
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Ok(LiveAgentCampaigns {
                agent_user: agent_user.to_string(),
                agent_name: None,
                campaigns: Vec::new(),
                ingroups: Vec::new(),
                count_campaigns: 0,
                count_ingroups: 0,
                raw,
            });
        }
        if is_empty_or_error(&raw) {
            return Err(GatewayError::Remote(raw));
        }

        let line = agent_campaign_line(&raw);
        let mut names: BTreeMap<String, String> = load_campaign_map(&self.settings.campaign_map_paths)
            .await
            .map(|m| m.entries)
            .unwrap_or_default();
        for id in &line.campaigns {
            if !names.contains_key(id) {
                if let Some(cached) = self.cache.get(id) {
                    names.insert(id.clone(), cached);
                }
            }
        }
        if line.campaigns.iter().any(|id| !names.contains_key(id)) {
            match self.fetch_all_campaigns().await {
                Ok(entries) => {
                    let mut added = false;
                    for (id, name) in entries {
                        added |= self.cache.set_if_absent(id.as_str(), name.as_str());
                        names.entry(id).or_insert(name);
                    }
                    if added {
                        self.cache.flush_best_effort().await;
                    }
                }
                Err(err) => debug!(error = %err, "campaign list unavailable for live view"),
            }
        }

        let campaigns: Vec<CampaignRef> = line
            .campaigns
            .iter()
            .map(|id| CampaignRef::new(id.as_str(), names.get(id).cloned().unwrap_or_else(|| id.clone())))
            .collect();
        let agent_name = self.lookup_agent_name(agent_user, credentials).await;

        let live = LiveAgentCampaigns {
            agent_user: agent_user.to_string(),
            agent_name,
            count_campaigns: campaigns.len(),
            count_ingroups: line.ingroups.len(),
            campaigns,
            ingroups: line.ingroups,
            raw,
        };
        for file in [agent_file_name(agent_user), LIVE_AGENT_FILE.to_string()] {
            if let Err(err) = self.snapshots.write_json(&file, &live).await {
                warn!(file = %file, error = %err, "live agent snapshot write failed");
            }
        }
        Ok(live)
    }

    /// `agent_info` first, then the agent's last 30 days of stats.
    async fn lookup_agent_name(&self, agent_user: &str, credentials: &Credentials) -> Option<String> {
        let info_call = with_credentials(
            RemoteCall::new(AGENT_INFO).param("agent_user", agent_user),
            credentials,
        );
        if let Ok(raw) = self.remote.call(info_call).await {
            if let Some(name) = parse(&raw).and_then(|p| p.first().and_then(agent_name_from_info)) {
                return Some(name);
            }
        }

        let (start, end) = trailing_window(Local::now().naive_local(), NAME_FALLBACK_DAYS);
        let stats_call = RemoteCall::new(AGENT_STATS_EXPORT)
            .param("DB", "0")
            .pipe_with_header()
            .param("time_format", "M")
            .param("datetime_start", start)
            .param("datetime_end", end)
            .param("agent_user", agent_user);
        let raw = self.remote.call(with_credentials(stats_call, credentials)).await.ok()?;
        let parsed = parse(&raw)?;
        let row = parsed.first()?;
        row.first_present(STATS_AGENT_NAME_FIELDS)
            .or_else(|| row.value_at(1).map(str::trim).filter(|v| !v.is_empty()))
            .map(ToString::to_string)
    }
}

/// Per-agent campaign counts from the consolidated snapshot, or from the
/// per-agent files when no consolidated snapshot exists yet.
pub async fn campaign_counts(snapshots: &SnapshotStore) -> anyhow::Result<CampaignCounts> {
    if let Some(all) = snapshots
        .read_json::<BTreeMap<String, JsonValue>>(CONSOLIDATED_FILE)
        .await?
    {
        let counts = all
            .into_iter()
            .map(|(agent, entry)| {
                let count = entry.get("count_campaigns").and_then(JsonValue::as_u64).unwrap_or(0);
                (agent, count)
            })
            .collect();
        return Ok(CampaignCounts {
            counts,
            source: Some(CountsSource::Consolidated),
        });
    }

    if !tokio::fs::try_exists(snapshots.root()).await.unwrap_or(false) {
        return Ok(CampaignCounts {
            counts: BTreeMap::new(),
            source: None,
        });
    }

    let mut counts = BTreeMap::new();
    for file in snapshots.list_files(AGENT_FILE_PREFIX, ".json").await? {
        let entry = match snapshots.read_json::<JsonValue>(&file).await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(err) => {
                debug!(file = %file, error = %err, "skipping unreadable agent snapshot");
                continue;
            }
        };
        let agent = entry
            .get("agent_user")
            .or_else(|| entry.get("agent"))
            .and_then(JsonValue::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                file.trim_start_matches(AGENT_FILE_PREFIX)
                    .trim_end_matches(".json")
                    .to_string()
            });
        let count = match entry.get("campaigns").and_then(JsonValue::as_array) {
            Some(list) => list.len() as u64,
            None => entry.get("count_campaigns").and_then(JsonValue::as_u64).unwrap_or(0),
        };
        counts.insert(agent, count);
    }
    Ok(CampaignCounts {
        counts,
        source: Some(CountsSource::IndividualFiles),
    })
}
