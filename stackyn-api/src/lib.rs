pub mod apps;
pub mod auth;
pub mod env;
pub mod logs;
pub mod webhook;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use bollard::Docker;
use sqlx::PgPool;
use stackyn_billing::{BillingService, ChannelNotifier, WebhookHandler};
use stackyn_cleanup::BillingCleanup;
use stackyn_deployer::Controller;
use stackyn_logs::LogPersister;
use stackyn_queue::Queue;

/// Everything a handler needs, cloned into every request. Mirrors
/// `gateway/src/api/latest.rs`'s `RouterState`, minus the utoipa/JWT
/// machinery this surface doesn't need (see DESIGN.md).
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub docker: Docker,
    pub queue: Queue,
    pub logs: LogPersister,
    pub controller: Controller,
    pub billing: BillingService<ChannelNotifier>,
    pub webhook: Arc<WebhookHandler<ChannelNotifier, BillingCleanup>>,
    pub webhook_secret: Arc<str>,
    pub webhook_signature_header: Arc<str>,
}

/// Assembles the platform's sole external HTTP interface onto `state`.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/apps", post(apps::create_app))
        .route("/apps/:id", delete(apps::delete_app))
        .route("/apps/:id/redeploy", post(apps::redeploy_app))
        .route("/apps/:id/verify", get(apps::get_verify))
        .route("/apps/:id/deployments", get(apps::list_deployments))
        .route("/apps/:id/env", post(env::set_env))
        .route("/apps/:id/env/:key", delete(env::delete_env))
        .route("/deployments/:id/logs", get(logs::get_logs))
        .route("/webhooks/billing", post(webhook::post_webhook))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
