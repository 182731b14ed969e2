use bollard::{Docker, API_DEFAULT_VERSION};

use crate::error::{Error, ErrorKind};

/// Default per-request timeout bollard applies to the daemon connection.
const DOCKER_CLIENT_TIMEOUT_SECS: u64 = 60;

/// Connects to the container engine named by `host` (spec §6's
/// `DOCKER_HOST`), following `deployer/src/lib.rs::DeployerService::new`'s
/// `Docker::connect_with_unix` call rather than ignoring the configured
/// host in favor of the platform-default socket.
pub fn connect(host: &str) -> Result<Docker, Error> {
    let docker = if let Some(path) = host.strip_prefix("unix://") {
        Docker::connect_with_unix(path, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    } else if host.starts_with("http://") || host.starts_with("tcp://") {
        Docker::connect_with_http(host, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    } else {
        Docker::connect_with_unix(host, DOCKER_CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
    };

    docker.map_err(|err| {
        Error::new(ErrorKind::InternalPlatformError, "failed to connect to the container engine")
            .with_details(err.to_string())
    })
}
