//! Agent statistics, campaign assignments and the sync trigger.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vdash_adapters::fields::logged_in_users;
use vdash_adapters::functions::{AGENT_STATS_EXPORT, LOGGED_IN_AGENTS};
use vdash_adapters::time::normalize_remote_datetime;
use vdash_adapters::{Credentials, GatewayError, RemoteCall};
use vdash_core::{parse_rows, CampaignRef, Parsed};
use vdash_storage::sanitize_file_component;
use vdash_sync::{
    campaign_counts as read_campaign_counts, AgentCampaignPage, CountsSource, LiveAgentCampaigns,
    PageRequest, Pagination, SyncRequest, SyncRunSummary,
};

use crate::{lenient_u32, ok, present, ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatsQuery {
    start: Option<String>,
    end: Option<String>,
    agent_user: Option<String>,
    campaign_id: Option<String>,
}

fn stats_call(start: &str, end: &str, time_format: &str, campaign_id: Option<&str>) -> RemoteCall {
    RemoteCall::new(AGENT_STATS_EXPORT)
        .param("DB", "0")
        .param("time_format", time_format)
        .param("datetime_start", normalize_remote_datetime(start))
        .param("datetime_end", normalize_remote_datetime(end))
        .param_opt("campaign_id", campaign_id)
        .pipe_with_header()
}

pub(crate) async fn all_agent_stats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Option<Parsed>> {
    let (Some(start), Some(end)) = (present(&q.start), present(&q.end)) else {
        return Err(ApiError::validation("start and end are required"));
    };

    let data = state
        .pass_through(stats_call(start, end, "HF", present(&q.campaign_id)))
        .await?;
    let file = format!(
        "all_agents_{}_{}.json",
        sanitize_file_component(start),
        sanitize_file_component(end)
    );
    state.write_snapshot(&file, &data).await?;
    Ok(ok(data))
}

pub(crate) async fn single_agent_stats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Option<Parsed>> {
    let (Some(start), Some(end), Some(agent_user)) =
        (present(&q.start), present(&q.end), present(&q.agent_user))
    else {
        return Err(ApiError::validation("start, end, and agent_user are required"));
    };

    let call = stats_call(start, end, "M", present(&q.campaign_id)).param("agent_user", agent_user);
    let data = state.pass_through(call).await?;
    let file = format!(
        "single_agent_{}_{}_{}.json",
        sanitize_file_component(agent_user),
        sanitize_file_component(start),
        sanitize_file_component(end)
    );
    state.write_snapshot(&file, &data).await?;
    Ok(ok(data))
}

async fn active_agent_users(state: &AppState) -> Result<Vec<String>, GatewayError> {
    let raw = state
        .ctx
        .remote
        .call(RemoteCall::new(LOGGED_IN_AGENTS).pipe_with_header())
        .await?;
    Ok(logged_in_users(&parse_rows(&raw)))
}

#[derive(Debug, Serialize)]
pub(crate) struct LoggedInAgents {
    active_agents: Vec<String>,
    count: usize,
}

pub(crate) async fn logged_in_agents(State(state): State<Arc<AppState>>) -> ApiResult<LoggedInAgents> {
    let active_agents = active_agent_users(&state).await?;
    Ok(ok(LoggedInAgents {
        count: active_agents.len(),
        active_agents,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    agent_user: Option<String>,
    page: Option<String>,
    #[serde(rename = "perPage")]
    per_page: Option<String>,
    search: Option<String>,
}

impl PageQuery {
    fn page_request(&self) -> PageRequest {
        PageRequest::new(lenient_u32(&self.page), lenient_u32(&self.per_page))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentStatusRow {
    user: String,
    full_name: Option<String>,
    #[serde(rename = "full_name")]
    full_name_snake: Option<String>,
    user_group: Option<String>,
    is_active: bool,
    campaigns: Vec<CampaignRef>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AgentsPage {
    data: Vec<AgentStatusRow>,
    pagination: Pagination,
}

/// Stored agents, each flagged against the live logged-in list. The live
/// call is best effort: on failure every agent reads as inactive.
pub(crate) async fn agents_paginated(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> ApiResult<AgentsPage> {
    let active: HashSet<String> = match active_agent_users(&state).await {
        Ok(users) => users.into_iter().collect(),
        Err(err) => {
            warn!(error = %err, "failed to fetch active agents");
            HashSet::new()
        }
    };

    let request = q.page_request();
    let (agents, total) = state.ctx.store.agents_page(request, present(&q.search)).await?;
    let data = agents
        .into_iter()
        .map(|a| AgentStatusRow {
            is_active: active.contains(&a.user),
            full_name_snake: a.full_name.clone(),
            full_name: a.full_name,
            user: a.user,
            user_group: a.user_group,
            campaigns: a.campaigns,
        })
        .collect();
    Ok(ok(AgentsPage {
        data,
        pagination: Pagination::new(request, total),
    }))
}

pub(crate) async fn agent_campaigns_paginated(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> ApiResult<AgentCampaignPage> {
    let Some(agent_user) = present(&q.agent_user) else {
        return Err(ApiError::validation("agent_user required"));
    };
    state
        .ctx
        .store
        .agent_campaigns_page(agent_user, q.page_request())
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("Agent not found".into()))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CredentialQuery {
    agent_user: Option<String>,
    start: Option<String>,
    end: Option<String>,
    user: Option<String>,
    pass: Option<String>,
}

impl CredentialQuery {
    fn credentials(&self) -> Credentials {
        Credentials {
            user: present(&self.user).map(str::to_string),
            pass: present(&self.pass).map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
struct SoftFailure {
    success: bool,
    error: String,
}

/// Live view straight from the remote API. An error reply from the dialer
/// is reported in-band with status 200.
pub(crate) async fn agent_campaigns_live(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CredentialQuery>,
) -> Result<Response, ApiError> {
    let Some(agent_user) = present(&q.agent_user) else {
        return Err(ApiError::validation("agent_user required"));
    };

    match state.ctx.reconciler.reconcile_single(agent_user, &q.credentials()).await {
        Ok(live) => Ok(ok::<LiveAgentCampaigns>(live).into_response()),
        Err(GatewayError::Remote(error)) => Ok((
            StatusCode::OK,
            Json(SoftFailure { success: false, error }),
        )
            .into_response()),
        Err(err) => Err(err.into()),
    }
}

/// Full reconciliation and persistence pass. The pass runs on its own task,
/// so a client that hangs up does not stop it; a second trigger while one is
/// running gets 409.
pub(crate) async fn sync_all(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CredentialQuery>,
) -> ApiResult<SyncRunSummary> {
    let request = SyncRequest {
        start: present(&q.start).map(str::to_string),
        end: present(&q.end).map(str::to_string),
        credentials: q.credentials(),
    };
    info!("sync-all requested");
    let service = state.ctx.service.clone();
    let summary = tokio::spawn(async move { service.run_full_sync(&request).await })
        .await
        .map_err(|err| ApiError::Internal(format!("sync task failed: {err}")))??;
    Ok(ok(summary))
}

#[derive(Debug, Serialize)]
pub(crate) struct CountsEnvelope {
    success: bool,
    data: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<CountsSource>,
}

pub(crate) async fn campaign_counts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CountsEnvelope>, ApiError> {
    let counts = read_campaign_counts(&state.ctx.snapshots).await?;
    Ok(Json(CountsEnvelope {
        success: true,
        data: counts.counts,
        source: counts.source,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DetailsQuery {
    campaign_ids: Option<String>,
    agent_user: Option<String>,
    concurrency: Option<String>,
}

fn split_campaign_ids(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Names for explicit ids, or for every campaign the agent may dial when
/// no ids are given.
pub(crate) async fn campaign_details(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DetailsQuery>,
) -> ApiResult<Vec<CampaignRef>> {
    let mut ids = present(&q.campaign_ids).map(split_campaign_ids).unwrap_or_default();
    if ids.is_empty() {
        if let Some(agent_user) = present(&q.agent_user) {
            ids = state.ctx.resolver.campaign_ids_for_agent(agent_user).await;
        }
    }
    if ids.is_empty() {
        return Ok(ok(Vec::new()));
    }

    let concurrency = lenient_u32(&q.concurrency)
        .map(|n| n as usize)
        .unwrap_or(state.ctx.config.resolve_concurrency);
    Ok(ok(state.ctx.resolver.resolve_batch(&ids, concurrency).await))
}
