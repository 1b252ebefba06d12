//! Relational view of agents, campaigns and their links.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use vdash_core::CampaignRef;

pub const DEFAULT_PER_PAGE: u32 = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRow {
    pub id: i64,
    pub agent_user: String,
    pub full_name: Option<String>,
    pub user_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRow {
    pub id: i64,
    pub campaign_id: String,
    pub campaign_name: Option<String>,
}

impl CampaignRow {
    pub fn to_ref(&self) -> CampaignRef {
        CampaignRef::new(
            self.campaign_id.clone(),
            self.campaign_name.clone().unwrap_or_else(|| self.campaign_id.clone()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Clamps both values to at least 1; `per_page` defaults to 8.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Self {
            page: request.page,
            per_page: request.per_page,
            total,
            total_pages: total.div_ceil(u64::from(request.per_page)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListing {
    pub user: String,
    pub full_name: Option<String>,
    pub user_group: Option<String>,
    pub campaigns: Vec<CampaignRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentCampaignPage {
    pub agent_user: String,
    pub agent_name: Option<String>,
    pub user_group: Option<String>,
    pub campaigns: Vec<CampaignRef>,
    pub pagination: Pagination,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_agent(&self, agent_user: &str) -> Result<Option<AgentRow>, StoreError>;
    async fn create_agent(
        &self,
        agent_user: &str,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError>;
    async fn update_agent(
        &self,
        id: i64,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError>;

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRow>, StoreError>;
    async fn create_campaign(&self, campaign_id: &str, name: &str) -> Result<CampaignRow, StoreError>;
    async fn update_campaign(&self, id: i64, name: &str) -> Result<CampaignRow, StoreError>;

    /// Natural campaign ids currently linked to the agent row.
    async fn linked_campaign_ids(&self, agent_id: i64) -> Result<Vec<String>, StoreError>;
    /// Inserts the link; `false` when it already existed.
    async fn link(&self, agent_id: i64, campaign_row_id: i64) -> Result<bool, StoreError>;
    async fn unlink(&self, agent_id: i64, campaign_id: &str) -> Result<u64, StoreError>;

    /// Agents ordered by `agent_user`, optionally filtered by a substring of
    /// the user or full name, each with its linked campaigns.
    async fn agents_page(
        &self,
        page: PageRequest,
        search: Option<&str>,
    ) -> Result<(Vec<AgentListing>, u64), StoreError>;

    /// `None` when the agent is unknown.
    async fn agent_campaigns_page(
        &self,
        agent_user: &str,
        page: PageRequest,
    ) -> Result<Option<AgentCampaignPage>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    agents: Vec<AgentRow>,
    campaigns: Vec<CampaignRow>,
    links: BTreeSet<(i64, i64)>,
    next_id: i64,
    offline: bool,
    failing_agents: HashSet<String>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn campaigns_for(&self, agent_id: i64) -> Vec<CampaignRow> {
        let mut rows: Vec<CampaignRow> = self
            .links
            .iter()
            .filter(|(a, _)| *a == agent_id)
            .filter_map(|(_, c)| self.campaigns.iter().find(|row| row.id == *c).cloned())
            .collect();
        rows.sort_by(|a, b| {
            a.campaign_name
                .cmp(&b.campaign_name)
                .then_with(|| a.campaign_id.cmp(&b.campaign_id))
        });
        rows
    }
}

/// Process-local store used when no database is configured or reachable.
#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    state: Mutex<MemoryState>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ping` fail, as an unreachable database would.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes every write touching `agent_user` fail.
    pub fn fail_writes_for(&self, agent_user: &str) {
        self.state.lock().failing_agents.insert(agent_user.to_string());
    }

    pub fn agent_count(&self) -> usize {
        self.state.lock().agents.len()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    fn check_writable(state: &MemoryState, agent_user: &str) -> Result<(), StoreError> {
        if state.failing_agents.contains(agent_user) {
            return Err(StoreError::Message(format!("write rejected for agent {agent_user}")));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.state.lock().offline {
            return Err(StoreError::Message("store offline".to_string()));
        }
        Ok(())
    }

    async fn find_agent(&self, agent_user: &str) -> Result<Option<AgentRow>, StoreError> {
        let state = self.state.lock();
        Ok(state.agents.iter().find(|a| a.agent_user == agent_user).cloned())
    }

    async fn create_agent(
        &self,
        agent_user: &str,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError> {
        let mut state = self.state.lock();
        Self::check_writable(&state, agent_user)?;
        if state.agents.iter().any(|a| a.agent_user == agent_user) {
            return Err(StoreError::Message(format!("agent {agent_user} already exists")));
        }
        let row = AgentRow {
            id: state.next_id(),
            agent_user: agent_user.to_string(),
            full_name: full_name.map(ToString::to_string),
            user_group: user_group.map(ToString::to_string),
        };
        state.agents.push(row.clone());
        Ok(row)
    }

    async fn update_agent(
        &self,
        id: i64,
        full_name: Option<&str>,
        user_group: Option<&str>,
    ) -> Result<AgentRow, StoreError> {
        let mut state = self.state.lock();
        let agent_user = state
            .agents
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.agent_user.clone())
            .ok_or_else(|| StoreError::Message(format!("agent row {id} not found")))?;
        Self::check_writable(&state, &agent_user)?;
        let row = state
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::Message(format!("agent row {id} not found")))?;
        row.full_name = full_name.map(ToString::to_string);
        row.user_group = user_group.map(ToString::to_string);
        Ok(row.clone())
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<CampaignRow>, StoreError> {
        let state = self.state.lock();
        Ok(state.campaigns.iter().find(|c| c.campaign_id == campaign_id).cloned())
    }

    async fn create_campaign(&self, campaign_id: &str, name: &str) -> Result<CampaignRow, StoreError> {
        let mut state = self.state.lock();
        if state.campaigns.iter().any(|c| c.campaign_id == campaign_id) {
            return Err(StoreError::Message(format!("campaign {campaign_id} already exists")));
        }
        let row = CampaignRow {
            id: state.next_id(),
            campaign_id: campaign_id.to_string(),
            campaign_name: Some(name.to_string()),
        };
        state.campaigns.push(row.clone());
        Ok(row)
    }

    async fn update_campaign(&self, id: i64, name: &str) -> Result<CampaignRow, StoreError> {
        let mut state = self.state.lock();
        let row = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::Message(format!("campaign row {id} not found")))?;
        row.campaign_name = Some(name.to_string());
        Ok(row.clone())
    }

    async fn linked_campaign_ids(&self, agent_id: i64) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .campaigns_for(agent_id)
            .into_iter()
            .map(|c| c.campaign_id)
            .collect())
    }

    async fn link(&self, agent_id: i64, campaign_row_id: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let agent_user = state
            .agents
            .iter()
            .find(|a| a.id == agent_id)
            .map(|a| a.agent_user.clone())
            .unwrap_or_default();
        Self::check_writable(&state, &agent_user)?;
        Ok(state.links.insert((agent_id, campaign_row_id)))
    }

    async fn unlink(&self, agent_id: i64, campaign_id: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let Some(row_id) = state
            .campaigns
            .iter()
            .find(|c| c.campaign_id == campaign_id)
            .map(|c| c.id)
        else {
            return Ok(0);
        };
        Ok(u64::from(state.links.remove(&(agent_id, row_id))))
    }

    async fn agents_page(
        &self,
        page: PageRequest,
        search: Option<&str>,
    ) -> Result<(Vec<AgentListing>, u64), StoreError> {
        let state = self.state.lock();
        let mut matching: Vec<&AgentRow> = state
            .agents
            .iter()
            .filter(|a| match search {
                Some(term) => {
                    a.agent_user.contains(term)
                        || a.full_name.as_deref().is_some_and(|n| n.contains(term))
                }
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| a.agent_user.cmp(&b.agent_user));
        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .map(|a| AgentListing {
                user: a.agent_user.clone(),
                full_name: a.full_name.clone(),
                user_group: a.user_group.clone(),
                campaigns: state.campaigns_for(a.id).iter().map(CampaignRow::to_ref).collect(),
            })
            .collect();
        Ok((data, total))
    }

    async fn agent_campaigns_page(
        &self,
        agent_user: &str,
        page: PageRequest,
    ) -> Result<Option<AgentCampaignPage>, StoreError> {
        let state = self.state.lock();
        let Some(agent) = state.agents.iter().find(|a| a.agent_user == agent_user) else {
            return Ok(None);
        };
        let all = state.campaigns_for(agent.id);
        let total = all.len() as u64;
        let campaigns = all
            .iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .map(CampaignRow::to_ref)
            .collect();
        Ok(Some(AgentCampaignPage {
            agent_user: agent.agent_user.clone(),
            agent_name: agent.full_name.clone(),
            user_group: agent.user_group.clone(),
            campaigns,
            pagination: Pagination::new(page, total),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_and_offsets() {
        let page = PageRequest::new(Some(0), Some(0));
        assert_eq!((page.page, page.per_page), (1, 1));
        let page = PageRequest::new(Some(3), None);
        assert_eq!(page.per_page, 8);
        assert_eq!(page.offset(), 16);
    }

    #[test]
    fn pagination_rounds_pages_up() {
        assert_eq!(Pagination::new(PageRequest::new(Some(1), Some(8)), 17).total_pages, 3);
        assert_eq!(Pagination::new(PageRequest::default(), 0).total_pages, 0);
    }

    #[tokio::test]
    async fn memory_store_pages_and_searches_agents() {
        let store = MemoryAgentStore::new();
        for (user, name) in [("c3", "Carol"), ("a1", "Alice"), ("b2", "Bob")] {
            store.create_agent(user, Some(name), None).await.unwrap();
        }
        let (rows, total) = store
            .agents_page(PageRequest::new(Some(1), Some(2)), None)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            rows.iter().map(|r| r.user.as_str()).collect::<Vec<_>>(),
            vec!["a1", "b2"]
        );

        let (rows, total) = store.agents_page(PageRequest::default(), Some("Car")).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].user, "c3");
    }

    #[tokio::test]
    async fn link_is_idempotent_and_unlink_by_natural_id() {
        let store = MemoryAgentStore::new();
        let agent = store.create_agent("a1", None, None).await.unwrap();
        let camp = store.create_campaign("SALES", "Sales").await.unwrap();
        assert!(store.link(agent.id, camp.id).await.unwrap());
        assert!(!store.link(agent.id, camp.id).await.unwrap());
        assert_eq!(store.linked_campaign_ids(agent.id).await.unwrap(), vec!["SALES"]);
        assert_eq!(store.unlink(agent.id, "SALES").await.unwrap(), 1);
        assert_eq!(store.unlink(agent.id, "SALES").await.unwrap(), 0);
        assert_eq!(store.link_count(), 0);
    }

    #[tokio::test]
    async fn unknown_agent_has_no_campaign_page() {
        let store = MemoryAgentStore::new();
        assert!(store
            .agent_campaigns_page("ghost", PageRequest::default())
            .await
            .unwrap()
            .is_none());
    }
}
