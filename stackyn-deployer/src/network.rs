use std::collections::HashMap;

use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use stackyn_common::Error;
use tracing::{info, instrument};

/// Ensures the shared container network exists, creating it with the
/// bridge driver if missing. Idempotent check-then-create; a
/// create-time "already exists" error is swallowed.
#[instrument(skip(docker))]
pub async fn ensure_network(docker: &Docker, name: &str) -> Result<(), Error> {
    let mut filters = HashMap::new();
    filters.insert("name".to_string(), vec![name.to_string()]);

    let existing = docker
        .list_networks(Some(ListNetworksOptions { filters }))
        .await
        .map_err(Error::internal)?;

    if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
        return Ok(());
    }

    match docker
        .create_network(CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        })
        .await
    {
        Ok(_) => {
            info!(network = name, "created shared container network");
            Ok(())
        }
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => Ok(()),
        Err(err) => Err(Error::internal(err)),
    }
}
