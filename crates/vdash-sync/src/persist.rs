use std::collections::HashSet;

use serde::Serialize;
use tracing::{error, info, warn};
use vdash_core::{AgentCampaignSnapshot, AgentSyncError, ConsolidatedSnapshot, SyncStats};

use crate::store::{AgentStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbSyncResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DbSyncResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            stats: None,
            error: Some(error.into()),
        }
    }
}

/// Mirrors a consolidated snapshot into the store. Afterwards every agent's
/// relation set equals its snapshot's campaign ids. Failures for one agent
/// land in `stats.errors`; only an unreachable store fails the whole pass.
pub async fn persist_snapshot(store: &dyn AgentStore, snapshot: &ConsolidatedSnapshot) -> DbSyncResult {
    if let Err(err) = store.ping().await {
        error!(error = %err, "agent store unreachable; skipping persistence");
        return DbSyncResult::failed(err.to_string());
    }

    let mut stats = SyncStats::default();
    for (agent_user, entry) in snapshot {
        if let Err(err) = persist_agent(store, agent_user, entry, &mut stats).await {
            warn!(agent_user = %agent_user, error = %err, "agent persistence failed");
            stats.errors.push(AgentSyncError {
                agent: agent_user.clone(),
                error: err.to_string(),
            });
        }
    }

    info!(
        agents_created = stats.agents_created,
        agents_updated = stats.agents_updated,
        campaigns_created = stats.campaigns_created,
        campaigns_updated = stats.campaigns_updated,
        relations_created = stats.relations_created,
        relations_removed = stats.relations_removed,
        errors = stats.errors.len(),
        "snapshot persisted"
    );
    DbSyncResult {
        success: true,
        stats: Some(stats),
        error: None,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn persist_agent(
    store: &dyn AgentStore,
    agent_user: &str,
    entry: &AgentCampaignSnapshot,
    stats: &mut SyncStats,
) -> Result<(), StoreError> {
    let full_name = non_blank(entry.agent_name.as_deref());
    let user_group = non_blank(entry.user_group.as_deref());

    let agent = match store.find_agent(agent_user).await? {
        Some(existing) => {
            let row = store.update_agent(existing.id, full_name, user_group).await?;
            stats.agents_updated += 1;
            row
        }
        None => {
            let row = store.create_agent(agent_user, full_name, user_group).await?;
            stats.agents_created += 1;
            row
        }
    };

    let mut wanted: Vec<(String, i64)> = Vec::with_capacity(entry.campaigns.len());
    let mut seen = HashSet::new();
    for campaign in &entry.campaigns {
        let id = campaign.id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        let supplied = non_blank(Some(campaign.name.as_str()));
        let row = match store.find_campaign(id).await? {
            Some(existing) => {
                let name = supplied
                    .map(ToString::to_string)
                    .or_else(|| existing.campaign_name.clone())
                    .unwrap_or_else(|| id.to_string());
                let row = store.update_campaign(existing.id, &name).await?;
                stats.campaigns_updated += 1;
                row
            }
            None => {
                let row = store.create_campaign(id, supplied.unwrap_or(id)).await?;
                stats.campaigns_created += 1;
                row
            }
        };
        wanted.push((id.to_string(), row.id));
    }

    let current: HashSet<String> = store.linked_campaign_ids(agent.id).await?.into_iter().collect();
    for (campaign_id, row_id) in &wanted {
        if !current.contains(campaign_id) && store.link(agent.id, *row_id).await? {
            stats.relations_created += 1;
        }
    }

    let wanted_ids: HashSet<&str> = wanted.iter().map(|(id, _)| id.as_str()).collect();
    let mut stale: Vec<&String> = current.iter().filter(|id| !wanted_ids.contains(id.as_str())).collect();
    stale.sort();
    for campaign_id in stale {
        if store.unlink(agent.id, campaign_id).await? > 0 {
            stats.relations_removed += 1;
        }
    }
    Ok(())
}
