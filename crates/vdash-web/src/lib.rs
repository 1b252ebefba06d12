//! JSON API over the call-center bridge.

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use vdash_adapters::RemoteCall;
use vdash_core::{parse, Parsed};
use vdash_sync::{maybe_build_scheduler, SyncConfig, SyncContext};

mod agents;
mod error;
mod reports;

#[cfg(test)]
mod testing;

pub use error::ApiError;

pub const CRATE_NAME: &str = "vdash-web";

const HEALTH_TEXT: &str = "VICIdial API Connected";

#[derive(Clone)]
pub struct AppState {
    pub ctx: SyncContext,
}

impl AppState {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Issues one remote call and parses the reply leniently; `None` for an
    /// empty body.
    async fn pass_through(&self, call: RemoteCall) -> Result<Option<Parsed>, ApiError> {
        let raw = self.ctx.remote.call(call).await?;
        Ok(parse(&raw))
    }

    async fn write_snapshot<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<(), ApiError> {
        self.ctx
            .snapshots
            .write_json(file_name, value)
            .await
            .with_context(|| format!("writing {file_name}"))?;
        Ok(())
    }
}

/// Success envelope: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

pub(crate) fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

pub(crate) type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Blank query values count as missing.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Positive integer or `None`; anything unparsable falls back to the default.
pub(crate) fn lenient_u32(value: &Option<String>) -> Option<u32> {
    present(value).and_then(|v| v.parse::<u32>().ok()).filter(|n| *n > 0)
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/agents/stats", get(agents::all_agent_stats))
        .route("/agents/stats/single", get(agents::single_agent_stats))
        .route("/agents/stats/paginated", get(agents::agents_paginated))
        .route("/agents/stats/logged-in", get(agents::logged_in_agents))
        .route("/agents/campaigns", get(agents::agent_campaigns_live))
        .route("/agents/campaigns/paginated", get(agents::agent_campaigns_paginated))
        .route(
            "/agents/campaigns/sync-all",
            get(agents::sync_all).post(agents::sync_all),
        )
        .route("/agents/campaigns/counts", get(agents::campaign_counts))
        .route("/agents/campaigns/details", get(agents::campaign_details))
        .route("/calls/reports", get(reports::call_reports))
        .route("/calls/links", get(reports::links))
        .route("/hopper", get(reports::hopper))
        .route("/lists", get(reports::lists))
        .route("/dashboard", get(reports::dashboard));

    Router::new()
        .route("/", get(|| async { HEALTH_TEXT }))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(state))
}

/// Binds the listener, starts the scheduler when enabled and serves until
/// the process stops.
pub async fn serve(ctx: SyncContext) -> anyhow::Result<()> {
    let port = ctx.config.listen_port;
    let scheduler = maybe_build_scheduler(&ctx.config, ctx.service.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(
            cron_1 = %ctx.config.sync_cron_1,
            cron_2 = %ctx.config.sync_cron_2,
            "sync scheduler started"
        );
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::new(ctx))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let ctx = SyncContext::from_config(SyncConfig::from_env()).await?;
    serve(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{get_json, test_app, FakeRemote};
    use axum::body::Body;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_text_at_root() {
        let (app, _dir, _store) = test_app(FakeRemote::default());
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), HEALTH_TEXT);
    }

    #[tokio::test]
    async fn cors_headers_are_permissive() {
        let (app, _dir, _store) = test_app(FakeRemote::default());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/agents/campaigns/counts")
                    .header("origin", "http://dashboard.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (app, _dir, _store) = test_app(FakeRemote::default());
        let (status, _) = get_json(app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn lenient_numbers_fall_back() {
        assert_eq!(lenient_u32(&Some("3".into())), Some(3));
        assert_eq!(lenient_u32(&Some("abc".into())), None);
        assert_eq!(lenient_u32(&Some("0".into())), None);
        assert_eq!(lenient_u32(&None), None);
    }
}
