//! Remote call-center API gateway and response-shape helpers.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use vdash_storage::{FetchError, FetchedResponse, HttpFetcher};

pub mod campaign_map;
pub mod codes;
pub mod fields;
pub mod time;

pub const CRATE_NAME: &str = "vdash-adapters";

/// Always sent as the `source` query parameter.
pub const SOURCE_TAG: &str = "node-api";

/// Remote function names used by this crate's callers.
pub mod functions {
    pub const AGENT_STATS_EXPORT: &str = "agent_stats_export";
    pub const AGENT_CAMPAIGNS: &str = "agent_campaigns";
    pub const AGENT_INFO: &str = "agent_info";
    pub const CAMPAIGNS_LIST: &str = "campaigns_list";
    pub const LOGGED_IN_AGENTS: &str = "logged_in_agents";
    pub const HOPPER_LIST: &str = "hopper_list";
    pub const LIST_INFO: &str = "list_info";
    pub const DID_LOG_EXPORT: &str = "did_log_export";
    pub const CALL_STATUS_STATS: &str = "call_status_stats";
    pub const USER_GROUP_STATUS: &str = "user_group_status";
}

const RESERVED_KEYS: [&str; 4] = ["source", "user", "pass", "function"];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Body of an `ERROR`-prefixed reply, verbatim.
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Transport(#[from] FetchError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// One outbound request: a remote function name plus its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCall {
    function: Option<String>,
    params: Vec<(String, String)>,
}

impl RemoteCall {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            params: Vec::new(),
        }
    }

    /// Builds a call from a flat parameter map that carries the function
    /// name under the `function` key.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut call = Self::default();
        for (k, v) in params {
            let (k, v) = (k.into(), v.into());
            if k == "function" {
                call.function = Some(v);
            } else {
                call = call.param(k, v);
            }
        }
        call
    }

    /// Sets a parameter, replacing an earlier value for the same key.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    pub fn param_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// `stage=pipe` + `header=YES`: the delimited-with-header reply format.
    pub fn pipe_with_header(self) -> Self {
        self.param("stage", "pipe").param("header", "YES")
    }

    pub fn function(&self) -> Option<&str> {
        self.function.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Outgoing query: `source`, `user`, `pass`, `function`, then the rest.
    /// Explicit `user`/`pass` params override `defaults`.
    pub fn query(&self, defaults: &Credentials) -> Result<Vec<(String, String)>, GatewayError> {
        let function = self
            .function()
            .ok_or_else(|| GatewayError::InvalidArgument("no function specified".to_string()))?;

        let user = self.get("user").map(ToString::to_string).or_else(|| defaults.user.clone());
        let pass = self.get("pass").map(ToString::to_string).or_else(|| defaults.pass.clone());

        let mut query = vec![("source".to_string(), SOURCE_TAG.to_string())];
        if let Some(user) = user {
            query.push(("user".to_string(), user));
        }
        if let Some(pass) = pass {
            query.push(("pass".to_string(), pass));
        }
        query.push(("function".to_string(), function.to_string()));
        query.extend(
            self.params
                .iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .cloned(),
        );
        Ok(query)
    }
}

/// Rejects replies whose body starts with `ERROR` (case-sensitive).
pub fn check_reply(body: String) -> Result<String, GatewayError> {
    if body.starts_with("ERROR") {
        Err(GatewayError::Remote(body))
    } else {
        Ok(body)
    }
}

/// Seam between callers and the remote call-center API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Raw reply body for `call`; callers parse it.
    async fn call(&self, call: RemoteCall) -> Result<String, GatewayError>;
}

#[derive(Debug)]
pub struct ViciGateway {
    base_url: String,
    credentials: Credentials,
    http: HttpFetcher,
}

impl ViciGateway {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, http: HttpFetcher) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            http,
        }
    }
}

#[async_trait]
impl RemoteApi for ViciGateway {
    async fn call(&self, call: RemoteCall) -> Result<String, GatewayError> {
        let query = call.query(&self.credentials)?;
        debug!(function = call.function().unwrap_or_default(), "remote call");
        let response = self.http.fetch_text(&self.base_url, &query).await?;
        check_response(response)
    }
}

/// Remote `ERROR` text takes precedence over the HTTP status, so the exact
/// message survives a non-2xx reply.
pub fn check_response(response: FetchedResponse) -> Result<String, GatewayError> {
    let FetchedResponse { status, host, body } = response;
    let body = check_reply(body)?;
    Ok(FetchedResponse { status, host, body }.error_for_status()?)
}
