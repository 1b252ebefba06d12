use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vdash_adapters::{Credentials, RemoteApi, ViciGateway};
use vdash_core::ConsolidatedSnapshot;
use vdash_storage::{CampaignNameCache, HttpClientConfig, HttpFetcher, SnapshotStore};

pub mod config;
pub mod persist;
pub mod pg;
pub mod reconcile;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use persist::{persist_snapshot, DbSyncResult};
pub use pg::PgAgentStore;
pub use reconcile::{
    campaign_counts, CampaignCounts, CountsSource, LiveAgentCampaigns, ReconcileOutcome,
    ReconcileSettings, Reconciler, SeedSource, SyncError, SyncRequest,
};
pub use resolver::CampaignResolver;
pub use store::{
    AgentCampaignPage, AgentListing, AgentStore, MemoryAgentStore, PageRequest, Pagination,
    StoreError,
};

pub const CRATE_NAME: &str = "vdash-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agents_processed: usize,
    pub total_agents: usize,
    pub total_campaigns: usize,
    pub db_sync: DbSyncResult,
    pub results: ConsolidatedSnapshot,
}

/// Runs reconciliation followed by persistence, one pass at a time.
pub struct SyncService {
    reconciler: Reconciler,
    store: Arc<dyn AgentStore>,
    running: Mutex<()>,
}

impl SyncService {
    pub fn new(reconciler: Reconciler, store: Arc<dyn AgentStore>) -> Self {
        Self {
            reconciler,
            store,
            running: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Fails fast with [`SyncError::AlreadyRunning`] while another pass holds
    /// the slot.
    pub async fn run_full_sync(&self, request: &SyncRequest) -> Result<SyncRunSummary, SyncError> {
        let _slot = self.running.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async {
            info!("sync pass started");
            let outcome = self.reconciler.reconcile_all(request).await?;
            let db_sync = persist_snapshot(self.store.as_ref(), &outcome.results).await;
            if !db_sync.success {
                error!(error = db_sync.error.as_deref().unwrap_or_default(), "database sync failed");
            }
            let finished_at = Utc::now();
            info!(
                agents_processed = outcome.agents_processed,
                total_agents = outcome.total_agents,
                total_campaigns = outcome.total_campaigns,
                elapsed_ms = (finished_at - started_at).num_milliseconds(),
                "sync pass finished"
            );
            Ok::<_, SyncError>(SyncRunSummary {
                run_id,
                started_at,
                finished_at,
                agents_processed: outcome.agents_processed,
                total_agents: outcome.total_agents,
                total_campaigns: outcome.total_campaigns,
                db_sync,
                results: outcome.results,
            })
        }
        .instrument(info_span!("sync_run", %run_id))
        .await
    }
}

/// Everything the binary and the web layer share, wired once at startup.
#[derive(Clone)]
pub struct SyncContext {
    pub config: SyncConfig,
    pub remote: Arc<dyn RemoteApi>,
    pub cache: Arc<CampaignNameCache>,
    pub snapshots: SnapshotStore,
    pub store: Arc<dyn AgentStore>,
    pub resolver: CampaignResolver,
    pub reconciler: Reconciler,
    pub service: Arc<SyncService>,
}

impl SyncContext {
    pub fn assemble(
        config: SyncConfig,
        remote: Arc<dyn RemoteApi>,
        cache: Arc<CampaignNameCache>,
        store: Arc<dyn AgentStore>,
    ) -> Self {
        let snapshots = SnapshotStore::new(config.data_dir.clone());
        let settings = ReconcileSettings {
            roster_days: config.roster_days,
            pace_every: config.pace_every,
            pace_delay: config.pace_delay,
            campaign_map_paths: config.campaign_map_paths.clone(),
        };
        let reconciler = Reconciler::new(remote.clone(), cache.clone(), snapshots.clone(), settings);
        let resolver = CampaignResolver::new(remote.clone(), cache.clone());
        let service = Arc::new(SyncService::new(reconciler.clone(), store.clone()));
        Self {
            config,
            remote,
            cache,
            snapshots,
            store,
            resolver,
            reconciler,
            service,
        }
    }

    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(format!("{CRATE_NAME}/{}", env!("CARGO_PKG_VERSION"))),
            ..Default::default()
        })?;
        let remote: Arc<dyn RemoteApi> = Arc::new(ViciGateway::new(
            config.remote_base_url.clone(),
            Credentials {
                user: config.remote_user.clone(),
                pass: config.remote_pass.clone(),
            },
            http,
        ));
        let cache = Arc::new(CampaignNameCache::load_from_disk(config.cache_path()).await);
        info!(entries = cache.len(), "campaign name cache loaded");
        let store = connect_store(&config).await;
        Ok(Self::assemble(config, remote, cache, store))
    }
}

/// Postgres when `DATABASE_URL` is set and reachable, otherwise the
/// in-memory store.
pub async fn connect_store(config: &SyncConfig) -> Arc<dyn AgentStore> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; using in-memory agent store");
        return Arc::new(MemoryAgentStore::new());
    };
    match PgAgentStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(error = %err, "database unreachable; using in-memory agent store");
            Arc::new(MemoryAgentStore::new())
        }
    }
}

/// Two cron triggers sharing the service's single slot. A trigger that
/// finds a pass in progress does nothing.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    service: Arc<SyncService>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.sync_cron_1, &config.sync_cron_2] {
        let service = service.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let service = service.clone();
            Box::pin(async move {
                match service.run_full_sync(&SyncRequest::default()).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        agents = summary.total_agents,
                        "scheduled sync finished"
                    ),
                    Err(SyncError::AlreadyRunning) => {
                        info!("scheduled sync skipped; a pass is already running")
                    }
                    Err(err) => error!(error = %err, "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let context = SyncContext::from_config(SyncConfig::from_env()).await?;
    Ok(context.service.run_full_sync(&SyncRequest::default()).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRemote;
    use tempfile::tempdir;
    use vdash_adapters::functions::CAMPAIGNS_LIST;

    fn context(remote: ScriptedRemote, dir: &std::path::Path) -> (Arc<MemoryAgentStore>, SyncContext) {
        let mut config = SyncConfig::from_lookup(|_| None);
        config.data_dir = dir.to_path_buf();
        config.campaign_map_paths = Vec::new();
        config.pace_delay = Duration::ZERO;
        let store = Arc::new(MemoryAgentStore::new());
        let context = SyncContext::assemble(
            config,
            Arc::new(remote),
            Arc::new(CampaignNameCache::in_memory()),
            store.clone(),
        );
        (store, context)
    }

    #[tokio::test]
    async fn full_pass_reconciles_then_persists() {
        let dir = tempdir().expect("tempdir");
        let remote = ScriptedRemote::default()
            .roster("user|full_name\nagt1|Alice\nagt2|Bob\n")
            .reply(CAMPAIGNS_LIST, "", "campaign_id|campaign_name\nc1|One\nc2|Two\n")
            .agent_campaigns("agt1", "user|campaigns\nagt1|c1-c2\n")
            .unreachable(vdash_adapters::functions::AGENT_CAMPAIGNS, "agt2");
        let (store, context) = context(remote, dir.path());

        let summary = context
            .service
            .run_full_sync(&SyncRequest::default())
            .await
            .expect("summary");
        assert_eq!(summary.total_agents, 2);
        assert_eq!(summary.agents_processed, 1);
        assert_eq!(summary.total_campaigns, 2);
        assert!(summary.db_sync.success);
        assert!(summary.results["agt2"].error.is_some());

        assert_eq!(store.agent_count(), 2);
        assert_eq!(store.link_count(), 2);
        assert!(!context.service.is_running());
    }

    #[tokio::test]
    async fn overlapping_pass_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let (_, context) = context(ScriptedRemote::default(), dir.path());

        let _held = context.service.running.try_lock().expect("slot");
        assert!(context.service.is_running());
        let err = context
            .service
            .run_full_sync(&SyncRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));
    }

    #[tokio::test]
    async fn scheduler_is_skipped_when_disabled() {
        let dir = tempdir().expect("tempdir");
        let (_, context) = context(ScriptedRemote::default(), dir.path());
        let sched = maybe_build_scheduler(&context.config, context.service.clone())
            .await
            .expect("scheduler");
        assert!(sched.is_none());
    }
}
