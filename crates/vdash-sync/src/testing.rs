use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use vdash_adapters::functions::{AGENT_CAMPAIGNS, AGENT_STATS_EXPORT, CAMPAIGNS_LIST};
use vdash_adapters::{GatewayError, RemoteApi, RemoteCall};
use vdash_storage::FetchError;

enum Scripted {
    Body(String),
    Unreachable,
}

/// Replies keyed by (function, agent_user or campaign_id). Unscripted calls
/// answer with an `ERROR` reply.
#[derive(Default)]
pub(crate) struct ScriptedRemote {
    replies: HashMap<(String, String), Scripted>,
    calls: Mutex<Vec<RemoteCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedRemote {
    pub(crate) fn reply(mut self, function: &str, key: &str, body: &str) -> Self {
        self.replies
            .insert((function.to_string(), key.to_string()), Scripted::Body(body.to_string()));
        self
    }

    pub(crate) fn unreachable(mut self, function: &str, key: &str) -> Self {
        self.replies
            .insert((function.to_string(), key.to_string()), Scripted::Unreachable);
        self
    }

    pub(crate) fn campaign(self, id: &str, name: &str) -> Self {
        let body = format!("campaign_id|campaign_name\n{id}|{name}\n");
        self.reply(CAMPAIGNS_LIST, id, &body)
    }

    pub(crate) fn agent_campaigns(self, agent_user: &str, body: &str) -> Self {
        self.reply(AGENT_CAMPAIGNS, agent_user, body)
    }

    pub(crate) fn roster(self, body: &str) -> Self {
        self.reply(AGENT_STATS_EXPORT, "", body)
    }

    pub(crate) fn calls_for(&self, function: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.function() == Some(function))
            .count()
    }

    /// Highest number of calls that were awaiting a reply at the same time.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn last_call(&self, function: &str) -> Option<RemoteCall> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c.function() == Some(function))
            .cloned()
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn call(&self, call: RemoteCall) -> Result<String, GatewayError> {
        let function = call.function().unwrap_or_default().to_string();
        let key = call
            .get("agent_user")
            .or_else(|| call.get("campaign_id"))
            .unwrap_or_default()
            .to_string();
        self.calls.lock().push(call);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.replies.get(&(function.clone(), key)) {
            Some(Scripted::Body(body)) => Ok(body.clone()),
            Some(Scripted::Unreachable) => Err(GatewayError::Transport(FetchError::HttpStatus {
                status: 503,
                host: "dialer.test".to_string(),
            })),
            None => Err(GatewayError::Remote(format!("ERROR: {function} not scripted"))),
        }
    }
}
