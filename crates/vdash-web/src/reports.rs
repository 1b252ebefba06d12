//! Pass-through reports. Each handler mirrors its parsed reply into a
//! snapshot file before answering.

use std::sync::Arc;

use axum::extract::{Query, State};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vdash_adapters::functions::{
    CALL_STATUS_STATS, CAMPAIGNS_LIST, DID_LOG_EXPORT, HOPPER_LIST, LIST_INFO, LOGGED_IN_AGENTS,
    USER_GROUP_STATUS,
};
use vdash_adapters::RemoteCall;
use vdash_core::{parse_rows, Parsed, RemoteRecord};
use vdash_storage::sanitize_file_component;

use crate::{ok, present, ApiError, ApiResult, AppState};

const CALL_REPORTS_FILE: &str = "call_reports.json";
const LINKS_FILE: &str = "links.json";
const LISTS_FILE: &str = "lists.json";
const DASHBOARD_FILE: &str = "dashboard.json";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CallReportQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    phone_number: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Inbound reports cover one day for one DID; everything else goes to the
/// call status summary.
pub(crate) async fn call_reports(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CallReportQuery>,
) -> ApiResult<Option<Parsed>> {
    let call = if present(&q.kind) == Some("inbound") {
        let Some(phone_number) = present(&q.phone_number) else {
            return Err(ApiError::validation("phone_number required for inbound type"));
        };
        RemoteCall::new(DID_LOG_EXPORT)
            .param("phone_number", phone_number)
            .param_opt("date", present(&q.start_date))
    } else {
        RemoteCall::new(CALL_STATUS_STATS)
            .param_opt("start_date", present(&q.start_date))
            .param_opt("end_date", present(&q.end_date))
    };

    let data = state.pass_through(call.pipe_with_header()).await?;
    state.write_snapshot(CALL_REPORTS_FILE, &data).await?;
    Ok(ok(data))
}

pub(crate) async fn links(State(state): State<Arc<AppState>>) -> ApiResult<Option<Parsed>> {
    let data = state
        .pass_through(RemoteCall::new(USER_GROUP_STATUS).pipe_with_header())
        .await?;
    state.write_snapshot(LINKS_FILE, &data).await?;
    Ok(ok(data))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HopperQuery {
    campaign_id: Option<String>,
}

pub(crate) async fn hopper(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HopperQuery>,
) -> ApiResult<Option<Parsed>> {
    let Some(campaign_id) = present(&q.campaign_id) else {
        return Err(ApiError::validation("campaign_id required"));
    };
    let data = state.pass_through(hopper_call(campaign_id)).await?;
    let file = format!("hopper_{}.json", sanitize_file_component(campaign_id));
    state.write_snapshot(&file, &data).await?;
    Ok(ok(data))
}

fn hopper_call(campaign_id: &str) -> RemoteCall {
    RemoteCall::new(HOPPER_LIST)
        .param("campaign_id", campaign_id)
        .pipe_with_header()
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    list_id: Option<String>,
}

pub(crate) async fn lists(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Option<Parsed>> {
    let call = RemoteCall::new(LIST_INFO)
        .param_opt("list_id", present(&q.list_id))
        .param("leads_counts", "Y")
        .pipe_with_header();
    let data = state.pass_through(call).await?;
    state.write_snapshot(LISTS_FILE, &data).await?;
    Ok(ok(data))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Dashboard {
    campaigns: Vec<RemoteRecord>,
    active_campaigns: Vec<RemoteRecord>,
    inactive_campaigns: Vec<RemoteRecord>,
    /// One entry per campaign, in campaign order.
    hopper_data: Vec<Vec<RemoteRecord>>,
    agents: Vec<RemoteRecord>,
}

async fn hopper_rows(state: &AppState, campaign: &RemoteRecord) -> Vec<RemoteRecord> {
    let Some(campaign_id) = campaign.get("campaign_id").filter(|id| !id.is_empty()) else {
        return Vec::new();
    };
    match state.ctx.remote.call(hopper_call(campaign_id)).await {
        Ok(raw) => parse_rows(&raw),
        Err(err) => {
            debug!(campaign_id, error = %err, "hopper lookup failed");
            Vec::new()
        }
    }
}

/// Campaigns with their hoppers and the logged-in agents. Hopper lookups
/// run concurrently and a failed one reads as an empty hopper.
pub(crate) async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<Dashboard> {
    let raw = state
        .ctx
        .remote
        .call(RemoteCall::new(CAMPAIGNS_LIST).pipe_with_header())
        .await?;
    let campaigns = parse_rows(&raw);

    let hopper_data = join_all(campaigns.iter().map(|c| hopper_rows(&state, c))).await;

    let raw = state
        .ctx
        .remote
        .call(RemoteCall::new(LOGGED_IN_AGENTS).pipe_with_header())
        .await?;
    let agents = parse_rows(&raw);

    let (active_campaigns, inactive_campaigns): (Vec<_>, Vec<_>) = campaigns
        .iter()
        .cloned()
        .partition(|c| c.get("active") == Some("Y"));

    let dashboard = Dashboard {
        campaigns,
        active_campaigns,
        inactive_campaigns,
        hopper_data,
        agents,
    };
    state.write_snapshot(DASHBOARD_FILE, &dashboard).await?;
    Ok(ok(dashboard))
}
