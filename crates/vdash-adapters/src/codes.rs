//! Campaign-code extraction from `agent_campaigns` replies.
//!
//! A reply is a header line plus one data line such as
//! `agt1|SALES-SUPPORT-RENEW|INBOUND_A-INBOUND_B`: agent, allowed campaigns,
//! allowed in-groups, each list hyphen-delimited.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCampaignLine {
    pub campaigns: Vec<String>,
    pub ingroups: Vec<String>,
}

/// True for blank replies and replies starting with `ERROR:` in any case.
pub fn is_empty_or_error(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.to_ascii_uppercase().starts_with("ERROR:")
}

/// Second line when a header is present, otherwise the only line.
pub fn data_line(raw: &str) -> Option<&str> {
    let lines: Vec<&str> = raw
        .trim()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    match lines.as_slice() {
        [] => None,
        [only] => Some(*only),
        [_, data, ..] => Some(*data),
    }
}

/// Codes for the bulk pass: second pipe segment when the line has pipes,
/// otherwise the whole line; hyphen-delimited either way.
pub fn campaign_codes(raw: &str) -> Vec<String> {
    let Some(line) = data_line(raw) else {
        return Vec::new();
    };
    if line.contains('|') {
        let segment = line.split('|').nth(1).unwrap_or_default();
        clean_codes(segment.split('-'))
    } else {
        clean_codes(line.split('-'))
    }
}

/// Codes and in-groups for the live single-agent view, which also accepts a
/// comma-delimited data line.
pub fn agent_campaign_line(raw: &str) -> AgentCampaignLine {
    let Some(line) = data_line(raw) else {
        return AgentCampaignLine::default();
    };
    if line.contains('|') {
        let parts: Vec<&str> = line.split('|').collect();
        AgentCampaignLine {
            campaigns: parts
                .get(1)
                .map(|s| clean_codes(s.split('-')))
                .unwrap_or_default(),
            ingroups: parts
                .get(2)
                .map(|s| clean_codes(s.split('-')))
                .unwrap_or_default(),
        }
    } else if line.contains(',') {
        AgentCampaignLine {
            campaigns: clean_codes(line.split(',')),
            ingroups: Vec::new(),
        }
    } else {
        AgentCampaignLine {
            campaigns: clean_codes(line.split('-')),
            ingroups: Vec::new(),
        }
    }
}

/// Codes split on any run of characters outside `[A-Za-z0-9_]`. Without
/// pipes, a leading token equal to `agent_user` is dropped.
pub fn campaign_codes_tolerant(raw: &str, agent_user: &str) -> Vec<String> {
    let Some(line) = data_line(raw) else {
        return Vec::new();
    };
    let is_sep = |c: char| !(c.is_ascii_alphanumeric() || c == '_');
    if line.contains('|') {
        let segment = line.split('|').nth(1).unwrap_or_default();
        clean_codes(segment.split(is_sep))
    } else {
        let mut tokens: Vec<&str> = line.split(is_sep).filter(|t| !t.is_empty()).collect();
        if tokens.first() == Some(&agent_user) {
            tokens.remove(0);
        }
        clean_codes(tokens)
    }
}

/// Strips whitespace, pipes and commas, drops empties, dedupes in order.
fn clean_codes<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    parts
        .into_iter()
        .map(|p| {
            p.chars()
                .filter(|c| !c.is_whitespace() && *c != '|' && *c != ',')
                .collect::<String>()
        })
        .filter(|code| !code.is_empty())
        .filter(|code| seen.insert(code.clone()))
        .collect()
}
