use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerStateStatusEnum, ContainerSummary, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use stackyn_common::{Error, ErrorKind};
use tracing::{info, instrument, warn};

/// The resolved container spec a deploy task creates from:
/// `PORT=8080` injected first and as an override (any
/// user-supplied `PORT` is dropped), memory/CPU caps, no restart policy
/// (failures surface to the controller, not the container runtime's own
/// restarter), attached to the shared network, labeled for the reverse
/// proxy and for lookup/enumeration.
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub memory_mb: i64,
    pub cpu: f64,
    pub network: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    fn env_vec(&self) -> Vec<String> {
        let mut env = Vec::with_capacity(self.env.len() + 1);
        env.push("PORT=8080".to_string());
        for (key, value) in &self.env {
            if key == "PORT" {
                continue;
            }
            env.push(format!("{key}={value}"));
        }
        env
    }
}

/// Creates and starts a container from `spec`, removing it again if the
/// start fails. Returns the container id.
#[instrument(skip(docker, spec), fields(name = %spec.name))]
pub async fn create_and_start(docker: &Docker, spec: &ContainerSpec) -> Result<String, Error> {
    let memory_bytes = spec.memory_mb * 1024 * 1024;

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env_vec()),
        labels: Some(spec.labels.clone()),
        host_config: Some(HostConfig {
            memory: Some(memory_bytes),
            memory_swap: Some(memory_bytes),
            nano_cpus: Some((spec.cpu * 1e9) as i64),
            network_mode: Some(spec.network.clone()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: spec.name.clone(),
                platform: None,
            }),
            config,
        )
        .await
        .map_err(|err| Error::new(ErrorKind::InternalPlatformError, "failed to create container").with_details(err.to_string()))?;

    let start = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        docker.start_container(&created.id, None::<StartContainerOptions<String>>),
    )
    .await;

    match start {
        Ok(Ok(())) => {
            info!(container_id = %created.id, "container started");
            Ok(created.id)
        }
        Ok(Err(err)) => {
            warn!(error = ?err, container_id = %created.id, "container start failed, removing");
            remove(docker, &created.id).await.ok();
            Err(Error::new(ErrorKind::AppCrashOnStart, "container failed to start").with_details(err.to_string()))
        }
        Err(_) => {
            warn!(container_id = %created.id, "container start timed out, removing");
            remove(docker, &created.id).await.ok();
            Err(Error::new(ErrorKind::AppCrashOnStart, "container start timed out"))
        }
    }
}

#[instrument(skip(docker))]
pub async fn list_by_app(docker: &Docker, app_id: &str) -> Result<Vec<ContainerSummary>, Error> {
    let mut filters = HashMap::new();
    filters.insert("label".to_string(), vec![format!("app.id={app_id}")]);

    docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .map_err(Error::internal)
}

/// Stops then removes a container, tolerating "already gone".
#[instrument(skip(docker))]
pub async fn stop_and_remove(docker: &Docker, container_id: &str) -> Result<(), Error> {
    match docker
        .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
        .await
    {
        Ok(()) | Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
        Err(err) => warn!(error = ?err, container_id, "failed to stop container, attempting removal anyway"),
    }
    remove(docker, container_id).await
}

/// Removes a container outright, tolerating "already gone". Exposed for
/// the cleanup worker's resource sweep, which only ever targets
/// already-exited containers and has no need for the
/// stop-then-remove sequence [`stop_and_remove`] performs.
pub async fn remove(docker: &Docker, container_id: &str) -> Result<(), Error> {
    match docker
        .remove_container(
            container_id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        Ok(()) | Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
        Err(err) => Err(Error::internal(err)),
    }
}

/// Inspects the tagged image locally, retrying up to 3 times with a
/// short backoff to absorb a racy build→deploy filesystem propagation.
/// Never pulls from a remote registry.
#[instrument(skip(docker))]
pub async fn image_exists_with_retry(docker: &Docker, tag: &str) -> bool {
    for attempt in 0..3 {
        if docker.inspect_image(tag).await.is_ok() {
            return true;
        }
        if attempt < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(500 * (attempt + 1))).await;
        }
    }
    false
}

/// Current running-ness of a container, used by the health/crash monitor
/// and the verify projection.
#[instrument(skip(docker))]
pub async fn is_running(docker: &Docker, container_id: &str) -> Result<bool, Error> {
    let inspect = docker
        .inspect_container(container_id, None)
        .await
        .map_err(Error::internal)?;
    Ok(inspect
        .state
        .and_then(|s| s.status)
        .map(|status| status == ContainerStateStatusEnum::RUNNING)
        .unwrap_or(false))
}

// A transient inspect error is treated as "still there" so a blip
// doesn't tear down a monitor that should keep retrying.
#[instrument(skip(docker))]
pub async fn exists(docker: &Docker, container_id: &str) -> bool {
    match docker.inspect_container(container_id, None).await {
        Ok(_) => true,
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => false,
        Err(_) => true,
    }
}

/// Docker's top-level `RestartCount` for the container. With this
/// platform's restart policy always `none` this stays 0 unless a future
/// version starts recreating crashed containers in-place; read here
/// purely so the crash monitor can log "rollback required" severity at
/// its threshold, without acting on it (alert-only, see DESIGN.md).
#[instrument(skip(docker))]
pub async fn restart_count(docker: &Docker, container_id: &str) -> Result<i64, Error> {
    let inspect = docker
        .inspect_container(container_id, None)
        .await
        .map_err(Error::internal)?;
    Ok(inspect.restart_count.unwrap_or(0))
}

#[instrument(skip(docker))]
pub async fn tail_logs(docker: &Docker, container_id: &str, tail_lines: &str) -> Vec<u8> {
    let options = LogsOptions::<String> {
        stdout: true,
        stderr: true,
        tail: tail_lines.to_string(),
        ..Default::default()
    };

    let mut stream = docker.logs(container_id, Some(options));
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(output) => buf.extend_from_slice(&output.into_bytes()),
            Err(_) => break,
        }
    }
    buf
}
