//! Candidate field names, consulted in order, for the differently-labelled
//! columns the remote API returns depending on function and version.

use vdash_core::RemoteRecord;

pub const CAMPAIGN_NAME_FIELDS: &[&str] =
    &["campaign_name", "Campaign Name", "Outbound Process", "CALLER_NAME"];

pub const CAMPAIGN_ID_FIELDS: &[&str] = &[
    "campaign_id",
    "Outbound",
    "CAMPAIGN_ID",
    "campaign",
    "Campaign",
    "Campaign ID",
];

pub const AGENT_USER_FIELDS: &[&str] = &["user", "agent_user", "user_id"];

pub const AGENT_NAME_FIELDS: &[&str] = &["full_name", "fullname", "name", "full"];

/// Name columns of `agent_stats_export` rows.
pub const STATS_AGENT_NAME_FIELDS: &[&str] = &["full_name", "fullname", "agent_name", "name"];

pub const USER_GROUP_FIELDS: &[&str] = &["user_group", "userGroup"];

pub const LOGGED_IN_USER_FIELDS: &[&str] = &["user", "agent_user", "agent"];

/// (id, name) key pairs recognised in a local campaign map file.
pub const CAMPAIGN_MAP_PAIRS: &[(&str, &str)] = &[
    ("campaign_id", "campaign_name"),
    ("Outbound", "Outbound Process"),
    ("Campaign", "Campaign Name"),
];

/// Campaign display name from a single-campaign lookup row: the name
/// candidates first, then the second column.
pub fn campaign_name_from_row(row: &RemoteRecord) -> Option<String> {
    row.first_present(CAMPAIGN_NAME_FIELDS)
        .or_else(|| row.value_at(1).map(str::trim).filter(|v| !v.is_empty()))
        .map(ToString::to_string)
}

/// (id, name) from a bulk campaign-list row; both must be present.
pub fn campaign_entry_from_row(row: &RemoteRecord) -> Option<(String, String)> {
    let id = row.first_present(CAMPAIGN_ID_FIELDS)?;
    let name = row.first_present(CAMPAIGN_NAME_FIELDS)?;
    Some((id.to_string(), name.to_string()))
}

pub fn agent_user_from_row(row: &RemoteRecord) -> Option<String> {
    row.first_present(AGENT_USER_FIELDS).map(ToString::to_string)
}

/// Best-effort name from an `agent_info` row: the first column whose label
/// mentions a name, else the second non-blank value, else the only one.
pub fn agent_name_from_info(row: &RemoteRecord) -> Option<String> {
    let labelled = row
        .iter()
        .find(|(k, _)| {
            let k = k.to_ascii_lowercase();
            k.contains("name") || k.contains("full")
        })
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty());
    if let Some(name) = labelled {
        return Some(name.to_string());
    }
    let values: Vec<&str> = row.iter().map(|(_, v)| v.trim()).filter(|v| !v.is_empty()).collect();
    match values.as_slice() {
        [_, second, ..] => Some(second.to_string()),
        [only] => Some(only.to_string()),
        [] => None,
    }
}

pub fn logged_in_users(rows: &[RemoteRecord]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.first_present(LOGGED_IN_USER_FIELDS))
        .map(ToString::to_string)
        .collect()
}
