use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::StatusCode;
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use vdash_adapters::{GatewayError, RemoteApi, RemoteCall};
use vdash_storage::{CampaignNameCache, FetchError};
use vdash_sync::{MemoryAgentStore, SyncConfig, SyncContext};

use crate::{app, AppState};

/// Canned replies keyed by function name plus the first of `agent_user`,
/// `campaign_id`, `list_id` present on the call (empty otherwise).
#[derive(Default)]
pub(crate) struct FakeRemote {
    replies: HashMap<(String, String), Result<String, u16>>,
    calls: Mutex<Vec<RemoteCall>>,
    latency: Duration,
}

impl FakeRemote {
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn reply(mut self, function: &str, key: &str, body: &str) -> Self {
        self.replies
            .insert((function.into(), key.into()), Ok(body.to_string()));
        self
    }

    pub(crate) fn failing(mut self, function: &str, key: &str, status: u16) -> Self {
        self.replies.insert((function.into(), key.into()), Err(status));
        self
    }
}

fn call_key(call: &RemoteCall) -> String {
    ["agent_user", "campaign_id", "list_id"]
        .iter()
        .find_map(|k| call.get(k))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn call(&self, call: RemoteCall) -> Result<String, GatewayError> {
        let function = call.function().unwrap_or_default().to_string();
        let key = call_key(&call);
        self.calls.lock().push(call);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.replies.get(&(function.clone(), key)) {
            Some(Ok(body)) if body.starts_with("ERROR") => Err(GatewayError::Remote(body.clone())),
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(status)) => Err(GatewayError::Transport(FetchError::HttpStatus {
                status: *status,
                host: "dialer.test".into(),
            })),
            None => Err(GatewayError::Remote(format!("ERROR: {function} NO RECORDS FOUND"))),
        }
    }
}

/// Shared handle so tests can inspect the calls a handler made.
pub(crate) struct RemoteHandle(Arc<FakeRemote>);

impl RemoteHandle {
    pub(crate) fn last_call(&self, function: &str) -> Option<RemoteCall> {
        self.0
            .calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.function() == Some(function))
            .cloned()
    }
}

pub(crate) fn test_context(remote: FakeRemote) -> (SyncContext, TempDir, Arc<MemoryAgentStore>, RemoteHandle) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SyncConfig::from_lookup(|_| None);
    config.data_dir = dir.path().to_path_buf();
    config.campaign_map_paths = Vec::new();
    config.pace_delay = Duration::ZERO;
    let remote = Arc::new(remote);
    let store = Arc::new(MemoryAgentStore::new());
    let ctx = SyncContext::assemble(
        config,
        remote.clone(),
        Arc::new(CampaignNameCache::in_memory()),
        store.clone(),
    );
    (ctx, dir, store, RemoteHandle(remote))
}

pub(crate) fn test_app(remote: FakeRemote) -> (Router, TempDir, Arc<MemoryAgentStore>) {
    let (ctx, dir, store, _) = test_context(remote);
    (app(AppState::new(ctx)), dir, store)
}

pub(crate) async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    request_json(app, "GET", uri).await
}

pub(crate) async fn request_json(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}
