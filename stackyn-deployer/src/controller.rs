use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use serde::Serialize;
use sqlx::PgPool;
use stackyn_common::models::LogKind;
use stackyn_common::{Error, ErrorKind, Id};
use stackyn_logs::LogPersister;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::container;

/// Health/crash poll cadence.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// The external HTTP-reachability probe waits this long after deploy to
/// absorb TLS issuance latency before its first run.
const HTTP_PROBE_INITIAL_DELAY: Duration = Duration::from_secs(60);
/// Diagnostic tail captured when a container is found not running.
const CRASH_LOG_TAIL_LINES: &str = "200";
/// Restart-count threshold at which a "rollback required" severity log
/// is emitted, with no automatic rollback performed (see DESIGN.md).
const RESTART_ROLLBACK_THRESHOLD: i64 = 3;

/// The post-start half of the deployment controller: for every running
/// deployment, a runtime log streamer and a health/crash monitor, both
/// scoped to an app-level [`CancellationToken`] that is cancelled on app
/// deletion, with a container-level child token cancelled the moment
/// that specific container is superseded or removed.
#[derive(Clone)]
pub struct Controller {
    docker: Docker,
    pool: PgPool,
    logs: LogPersister,
    http: reqwest::Client,
    app_tokens: Arc<Mutex<HashMap<Id, CancellationToken>>>,
    container_tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Controller {
    pub fn new(docker: Docker, pool: PgPool, logs: LogPersister) -> Self {
        Self {
            docker,
            pool,
            logs,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client builds"),
            app_tokens: Arc::new(Mutex::new(HashMap::new())),
            container_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn app_token(&self, app_id: Id) -> CancellationToken {
        self.app_tokens
            .lock()
            .await
            .entry(app_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Spawns the runtime log streamer and health/crash monitor for one
    /// just-started deployment.
    #[instrument(skip(self))]
    pub async fn spawn(&self, app_id: Id, deployment_id: Id, container_id: String, url: String) {
        let app_token = self.app_token(app_id).await;
        let container_token = app_token.child_token();
        self.container_tokens
            .lock()
            .await
            .insert(container_id.clone(), container_token.clone());

        let streamer = self.clone();
        let streamer_container_id = container_id.clone();
        let streamer_token = container_token.clone();
        tokio::spawn(async move {
            streamer
                .run_log_streamer(app_id, deployment_id, streamer_container_id, streamer_token)
                .await;
        });

        let monitor = self.clone();
        let monitor_token = container_token.clone();
        tokio::spawn(async move {
            monitor
                .run_health_monitor(app_id, deployment_id, container_id, url, monitor_token)
                .await;
        });
    }

    // Deployment stopped+removed because a newer one superseded it;
    // doesn't touch the app-level context or other deployments' monitors.
    #[instrument(skip(self))]
    pub async fn cancel_container(&self, container_id: &str) {
        if let Some(token) = self.container_tokens.lock().await.remove(container_id) {
            token.cancel();
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel_app(&self, app_id: Id) {
        if let Some(token) = self.app_tokens.lock().await.remove(&app_id) {
            token.cancel();
        }
    }

    /// Opens a follow-log stream from the container runtime, forwarding
    /// chunks to the log persister; re-opens on transient stream failure,
    /// stops on container removal or app-context cancellation.
    #[instrument(skip(self, token))]
    async fn run_log_streamer(&self, app_id: Id, deployment_id: Id, container_id: String, token: CancellationToken) {
        use bollard::container::LogsOptions;
        use futures::StreamExt;

        loop {
            if token.is_cancelled() {
                return;
            }

            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                tail: "0".to_string(),
                ..Default::default()
            };
            let mut stream = self.docker.logs(&container_id, Some(options));

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    chunk = stream.next() => match chunk {
                        Some(Ok(output)) => {
                            let bytes = output.into_bytes();
                            if let Err(err) = self.logs.persist_log(app_id, deployment_id, LogKind::Runtime, &bytes).await {
                                warn!(error = ?err, %container_id, "failed to persist runtime log chunk");
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = ?err, %container_id, "runtime log stream error, reopening");
                            break;
                        }
                        None => break,
                    },
                }
            }

            if token.is_cancelled() || !container::exists(&self.docker, &container_id).await {
                return;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Every [`HEALTH_POLL_INTERVAL`], inspects the container; transitions
    /// the deployment (and, per newer-deployment-precedence, the app) to
    /// `error` if it is no longer running. An HTTP-reachability probe
    /// runs on the same cadence starting [`HTTP_PROBE_INITIAL_DELAY`]
    /// after deploy, failing identically.
    #[instrument(skip(self, token))]
    async fn run_health_monitor(
        &self,
        app_id: Id,
        deployment_id: Id,
        container_id: String,
        url: String,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(HEALTH_POLL_INTERVAL);
        let first_probe_at = tokio::time::Instant::now() + HTTP_PROBE_INITIAL_DELAY;
        let mut probed_once = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match container::is_running(&self.docker, &container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.handle_unhealthy(app_id, deployment_id, &container_id, ErrorKind::AppCrashOnStart, "container is not running")
                        .await;
                    return;
                }
                Err(_) => return,
            }

            let probe_due = probed_once || tokio::time::Instant::now() >= first_probe_at;
            if probe_due {
                probed_once = true;
                if !self.probe_reachable(&url).await {
                    self.handle_unhealthy(app_id, deployment_id, &container_id, ErrorKind::HealthcheckFailed, "HTTP reachability probe failed")
                        .await;
                    return;
                }
            }

            self.record_probe(deployment_id, true).await;
        }
    }

    /// Persists the outcome of the probe cycle that just ran, so
    /// `verify()` can read the last health-check result instead of one
    /// that already happened and was discarded.
    async fn record_probe(&self, deployment_id: Id, healthy: bool) {
        if let Err(err) = sqlx::query(
            "UPDATE deployments SET last_probe_healthy = $2, last_probe_at = now() WHERE id = $1",
        )
        .bind(deployment_id)
        .bind(healthy)
        .execute(&self.pool)
        .await
        {
            warn!(error = ?err, %deployment_id, "failed to persist health probe outcome");
        }
    }

    async fn probe_reachable(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
            Err(err) => {
                warn!(error = ?err, url, "http reachability probe failed");
                false
            }
        }
    }

    async fn handle_unhealthy(&self, app_id: Id, deployment_id: Id, container_id: &str, kind: ErrorKind, message: &str) {
        self.record_probe(deployment_id, false).await;

        let tail = container::tail_logs(&self.docker, container_id, CRASH_LOG_TAIL_LINES).await;
        if !tail.is_empty() {
            if let Err(err) = self.logs.persist_log(app_id, deployment_id, LogKind::Runtime, &tail).await {
                warn!(error = ?err, %deployment_id, "failed to persist crash diagnostic tail");
            }
        }

        if let Err(err) = sqlx::query(
            "UPDATE deployments SET status = 'error', error_message = $2, updated_at = now() WHERE id = $1",
        )
        .bind(deployment_id)
        .bind(format!("{kind}: {message}"))
        .execute(&self.pool)
        .await
        {
            warn!(error = ?err, %deployment_id, "failed to mark deployment error");
        }

        // Newer-deployment-precedence: a later deployment that is
        // already `running` supersedes the crash of an earlier one,
        // which is merely history — only flip the app if none is.
        let newer_running: (bool,) = sqlx::query_as(
            "SELECT exists(
                SELECT 1 FROM deployments newer
                WHERE newer.app_id = $1 AND newer.status = 'running'
                  AND newer.created_at > (SELECT created_at FROM deployments WHERE id = $2)
             )",
        )
        .bind(app_id)
        .bind(deployment_id)
        .fetch_one(&self.pool)
        .await
        .unwrap_or((false,));

        if !newer_running.0 {
            let _ = sqlx::query("UPDATE apps SET status = 'error', updated_at = now() WHERE id = $1")
                .bind(app_id)
                .execute(&self.pool)
                .await;
        }

        if let Ok(restarts) = container::restart_count(&self.docker, container_id).await {
            if restarts >= RESTART_ROLLBACK_THRESHOLD {
                tracing::error!(
                    %app_id, %deployment_id, restarts,
                    "rollback required: container is crash-looping, but no automatic rollback is performed in this version"
                );
            }
        }

        self.container_tokens.lock().await.remove(container_id);
        info!(%app_id, %deployment_id, %kind, "deployment transitioned to error");
    }
}

/// The read-only projection backing `GET /apps/{id}/verify`: a pure
/// function of current cluster state, never a trigger.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub success: bool,
    pub is_running: bool,
    pub port_bound: bool,
    pub proxy_configured: bool,
    /// Outcome of the deployment controller's most recent health probe;
    /// `None` if the monitor hasn't run one yet (e.g. within
    /// [`HTTP_PROBE_INITIAL_DELAY`] of a fresh deploy).
    pub last_probe_healthy: Option<bool>,
    pub errors: Vec<String>,
}

#[instrument(skip(docker, pool))]
pub async fn verify(docker: &Docker, pool: &PgPool, app_id: Id) -> Result<VerifyResult, Error> {
    let mut errors = Vec::new();

    let row: Option<(Option<String>, Option<String>, Option<bool>)> = sqlx::query_as(
        "SELECT container_id, subdomain, last_probe_healthy FROM deployments
         WHERE app_id = $1 AND status = 'running' LIMIT 1",
    )
    .bind(app_id)
    .fetch_optional(pool)
    .await?;

    let Some((container_id, subdomain, last_probe_healthy)) = row else {
        return Ok(VerifyResult {
            success: false,
            is_running: false,
            port_bound: false,
            proxy_configured: false,
            last_probe_healthy: None,
            errors: vec!["no running deployment for this app".to_string()],
        });
    };

    let Some(container_id) = container_id else {
        return Ok(VerifyResult {
            success: false,
            is_running: false,
            port_bound: false,
            proxy_configured: false,
            last_probe_healthy: None,
            errors: vec!["running deployment has no container id".to_string()],
        });
    };

    let is_running = match container::is_running(docker, &container_id).await {
        Ok(running) => running,
        Err(err) => {
            errors.push(format!("container inspect failed: {}", err.message));
            false
        }
    };
    if !is_running {
        errors.push("container is not running".to_string());
    }

    let labels = container::list_by_app(docker, &app_id.to_string())
        .await
        .ok()
        .and_then(|containers| containers.into_iter().find(|c| c.id.as_deref() == Some(container_id.as_str())))
        .and_then(|summary| summary.labels);

    let proxy_configured = labels
        .as_ref()
        .map(|labels| {
            labels.contains_key("traefik.enable")
                && labels
                    .iter()
                    .any(|(key, _)| key.starts_with("traefik.http.routers."))
        })
        .unwrap_or(false);
    if !proxy_configured {
        errors.push("reverse-proxy labels not found on container".to_string());
    }

    let port_bound = labels
        .as_ref()
        .and_then(|labels| {
            labels
                .iter()
                .find(|(key, _)| key.ends_with(".loadbalancer.server.port"))
                .map(|(_, value)| value == "8080")
        })
        .unwrap_or(false);
    if !port_bound {
        errors.push("load-balancer port label missing or not 8080".to_string());
    }

    if subdomain.is_none() {
        errors.push("no subdomain recorded for the running deployment".to_string());
    }

    if last_probe_healthy == Some(false) {
        errors.push("last health probe reported the deployment unhealthy".to_string());
    }

    Ok(VerifyResult {
        success: is_running
            && proxy_configured
            && port_bound
            && subdomain.is_some()
            && last_probe_healthy != Some(false),
        is_running,
        port_bound,
        proxy_configured,
        last_probe_healthy,
        errors,
    })
}
