//! Campaign id -> display name resolution backed by the persistent cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;
use vdash_adapters::codes::campaign_codes_tolerant;
use vdash_adapters::fields::campaign_name_from_row;
use vdash_adapters::functions::{AGENT_CAMPAIGNS, CAMPAIGNS_LIST};
use vdash_adapters::{GatewayError, RemoteApi, RemoteCall};
use vdash_core::{parse, CampaignRef};
use vdash_storage::CampaignNameCache;

pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 6;

#[derive(Clone)]
pub struct CampaignResolver {
    remote: Arc<dyn RemoteApi>,
    cache: Arc<CampaignNameCache>,
}

impl CampaignResolver {
    pub fn new(remote: Arc<dyn RemoteApi>, cache: Arc<CampaignNameCache>) -> Self {
        Self { remote, cache }
    }

    /// Cached names are authoritative. A miss costs one `campaigns_list`
    /// call; any failure resolves to the id itself, which is cached too.
    pub async fn resolve_one(&self, campaign_id: &str) -> CampaignRef {
        let id = campaign_id.trim();
        if id.is_empty() {
            return CampaignRef::new(id, id);
        }
        if let Some(name) = self.cache.get(id) {
            return CampaignRef::new(id, name);
        }

        let name = match self.lookup_remote(id).await {
            Ok(Some(name)) => name,
            Ok(None) => id.to_string(),
            Err(err) => {
                debug!(campaign_id = id, error = %err, "campaign lookup failed; using id as name");
                id.to_string()
            }
        };

        if self.cache.set_if_absent(id, &name) {
            self.cache.flush_best_effort().await;
            CampaignRef::new(id, name)
        } else {
            let cached = self.cache.get(id).unwrap_or(name);
            CampaignRef::new(id, cached)
        }
    }

    /// Resolves in windows of at most `concurrency` lookups; output keeps
    /// input order. Repeated ids are looked up once.
    pub async fn resolve_batch(&self, campaign_ids: &[String], concurrency: usize) -> Vec<CampaignRef> {
        let window = concurrency.max(1);
        let mut seen = HashSet::new();
        let unique: Vec<&str> = campaign_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .collect();

        let mut resolved = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(window) {
            let refs = join_all(chunk.iter().map(|id| self.resolve_one(id))).await;
            resolved.extend(chunk.iter().copied().zip(refs));
        }

        campaign_ids
            .iter()
            .filter_map(|id| resolved.get(id.trim()).cloned())
            .collect()
    }

    /// Campaign ids allowed for one agent, extracted tolerantly. Remote
    /// failures yield an empty list.
    pub async fn campaign_ids_for_agent(&self, agent_user: &str) -> Vec<String> {
        let call = RemoteCall::new(AGENT_CAMPAIGNS)
            .param("agent_user", agent_user)
            .pipe_with_header();
        match self.remote.call(call).await {
            Ok(raw) => campaign_codes_tolerant(&raw, agent_user),
            Err(err) => {
                debug!(agent_user, error = %err, "agent campaign lookup failed");
                Vec::new()
            }
        }
    }

    async fn lookup_remote(&self, campaign_id: &str) -> Result<Option<String>, GatewayError> {
        let raw = self
            .remote
            .call(
                RemoteCall::new(CAMPAIGNS_LIST)
                    .param("campaign_id", campaign_id)
                    .pipe_with_header(),
            )
            .await?;
        Ok(parse(&raw).and_then(|parsed| parsed.first().and_then(campaign_name_from_row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRemote;
    use tempfile::tempdir;

    #[tokio::test]
    async fn cached_ids_never_hit_the_remote() {
        let remote = Arc::new(ScriptedRemote::default());
        let cache = Arc::new(CampaignNameCache::in_memory());
        cache.set("SALES", "Sales Team");
        let resolver = CampaignResolver::new(remote.clone(), cache);

        let resolved = resolver.resolve_one("SALES").await;
        assert_eq!(resolved.name, "Sales Team");
        assert_eq!(remote.calls_for(CAMPAIGNS_LIST), 0);
    }

    #[tokio::test]
    async fn miss_is_resolved_once_then_cached_and_flushed() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        let remote = Arc::new(ScriptedRemote::default().campaign("SALES", "Sales Team"));
        let cache = Arc::new(CampaignNameCache::with_path(&path));
        let resolver = CampaignResolver::new(remote.clone(), cache.clone());

        for _ in 0..3 {
            assert_eq!(resolver.resolve_one("SALES").await.name, "Sales Team");
        }
        assert_eq!(remote.calls_for(CAMPAIGNS_LIST), 1);
        assert_eq!(cache.flush_attempts(), 1);

        let reloaded = CampaignNameCache::load_from_disk(&path).await;
        assert_eq!(reloaded.get("SALES").as_deref(), Some("Sales Team"));
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_id_and_is_cached() {
        let remote = Arc::new(ScriptedRemote::default());
        let cache = Arc::new(CampaignNameCache::in_memory());
        let resolver = CampaignResolver::new(remote.clone(), cache.clone());

        assert_eq!(resolver.resolve_one("GHOST").await.name, "GHOST");
        assert_eq!(resolver.resolve_one("GHOST").await.name, "GHOST");
        assert_eq!(remote.calls_for(CAMPAIGNS_LIST), 1);
        assert_eq!(cache.get("GHOST").as_deref(), Some("GHOST"));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let remote = Arc::new(
            ScriptedRemote::default()
                .campaign("A", "Alpha")
                .campaign("B", "Beta")
                .campaign("C", "Gamma"),
        );
        let resolver = CampaignResolver::new(remote, Arc::new(CampaignNameCache::in_memory()));
        let ids: Vec<String> = ["C", "A", "X", "B"].iter().map(|s| s.to_string()).collect();

        let names: Vec<String> = resolver
            .resolve_batch(&ids, 2)
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Gamma", "Alpha", "X", "Beta"]);
    }

    #[tokio::test]
    async fn repeated_ids_in_one_batch_cost_one_lookup() {
        let remote = Arc::new(ScriptedRemote::default().campaign("A", "Alpha"));
        let resolver = CampaignResolver::new(remote.clone(), Arc::new(CampaignNameCache::in_memory()));
        let ids: Vec<String> = ["A", "A", " A "].iter().map(|s| s.to_string()).collect();

        let resolved = resolver.resolve_batch(&ids, 6).await;
        assert_eq!(resolved.len(), 3);
        assert!(resolved.iter().all(|c| c.id == "A" && c.name == "Alpha"));
        assert_eq!(remote.calls_for(CAMPAIGNS_LIST), 1);
    }

    #[tokio::test]
    async fn batch_keeps_lookups_within_the_window() {
        let remote = Arc::new(ScriptedRemote::default());
        let resolver = CampaignResolver::new(remote.clone(), Arc::new(CampaignNameCache::in_memory()));
        let ids: Vec<String> = (0..7).map(|n| format!("C{n}")).collect();

        let resolved = resolver.resolve_batch(&ids, 3).await;
        assert_eq!(resolved.len(), 7);
        assert_eq!(remote.calls_for(CAMPAIGNS_LIST), 7);
        assert_eq!(remote.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn agent_campaign_ids_tolerate_failures() {
        let remote = Arc::new(
            ScriptedRemote::default().agent_campaigns("agt1", "user|campaigns\nagt1|A-B\n"),
        );
        let resolver = CampaignResolver::new(remote, Arc::new(CampaignNameCache::in_memory()));
        assert_eq!(resolver.campaign_ids_for_agent("agt1").await, vec!["A", "B"]);
        assert!(resolver.campaign_ids_for_agent("nobody").await.is_empty());
    }
}
