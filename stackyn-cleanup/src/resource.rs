use std::collections::HashMap;
use std::path::Path;
use std::time::Duration as StdDuration;

use bollard::container::PruneContainersOptions;
use bollard::image::PruneImagesOptions;
use bollard::Docker;
use serde::Serialize;
use stackyn_common::Error;
use tracing::{info, instrument, warn};

/// Default age threshold below which exited containers / dangling images
/// are left alone (removed by age, not by status).
pub const DEFAULT_CONTAINER_AGE: StdDuration = StdDuration::from_secs(24 * 60 * 60);
/// Orphaned clone directories older than this are pruned. The build
/// worker already removes these on every exit path; this catches
/// whatever a worker crash left behind.
pub const DEFAULT_TEMP_DIR_AGE: StdDuration = StdDuration::from_secs(60 * 60);

/// Counts emitted by one resource-sweep run. Running the cleanup worker
/// twice back-to-back yields the same platform state as running it
/// once — re-running with nothing left to collect yields all zeros.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ResourceSweepReport {
    pub containers_removed: u64,
    pub images_removed: u64,
    pub space_freed_mb: u64,
    pub temp_dirs_pruned: u64,
}

/// Resource sweep: exited containers past [`DEFAULT_CONTAINER_AGE`],
/// dangling images, orphaned clone directories. Every operation here is
/// idempotent by construction — Docker's prune filters and a plain
/// directory-age check both naturally converge to "nothing left to do".
#[instrument(skip(docker))]
pub async fn sweep(docker: &Docker, clone_root: &Path) -> Result<ResourceSweepReport, Error> {
    let mut report = ResourceSweepReport::default();

    let (containers_removed, container_space) = prune_exited_containers(docker, DEFAULT_CONTAINER_AGE).await?;
    report.containers_removed = containers_removed;

    let (images_removed, image_space) = prune_dangling_images(docker).await?;
    report.images_removed = images_removed;

    report.space_freed_mb = (container_space + image_space) / (1024 * 1024);
    report.temp_dirs_pruned = prune_orphaned_clone_dirs(clone_root, DEFAULT_TEMP_DIR_AGE).await;

    info!(
        containers_removed = report.containers_removed,
        images_removed = report.images_removed,
        space_freed_mb = report.space_freed_mb,
        temp_dirs_pruned = report.temp_dirs_pruned,
        "resource sweep complete"
    );

    Ok(report)
}

async fn prune_exited_containers(docker: &Docker, older_than: StdDuration) -> Result<(u64, u64), Error> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    filters.insert("until".to_string(), vec![format!("{}s", older_than.as_secs())]);

    let response = docker
        .prune_containers(Some(PruneContainersOptions { filters }))
        .await
        .map_err(Error::internal)?;

    let removed = response
        .containers_deleted
        .map(|ids| ids.len() as u64)
        .unwrap_or(0);
    let space = response.space_reclaimed.unwrap_or(0).max(0) as u64;
    Ok((removed, space))
}

async fn prune_dangling_images(docker: &Docker) -> Result<(u64, u64), Error> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    filters.insert("dangling".to_string(), vec!["true".to_string()]);

    let response = docker
        .prune_images(Some(PruneImagesOptions { filters }))
        .await
        .map_err(Error::internal)?;

    let removed = response.images_deleted.map(|ids| ids.len() as u64).unwrap_or(0);
    let space = response.space_reclaimed.unwrap_or(0).max(0) as u64;
    Ok((removed, space))
}

/// Removes subdirectories of `clone_root` whose modification time is
/// older than `older_than`. The build worker already removes its own
/// clone directory on every exit path; this only ever finds something
/// after a hard worker crash.
async fn prune_orphaned_clone_dirs(clone_root: &Path, older_than: StdDuration) -> u64 {
    let mut pruned = 0u64;

    let mut entries = match tokio::fs::read_dir(clone_root).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let cutoff = std::time::SystemTime::now() - older_than;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff {
            if let Err(err) = tokio::fs::remove_dir_all(entry.path()).await {
                warn!(error = ?err, dir = %entry.path().display(), "failed to prune orphaned clone directory");
                continue;
            }
            pruned += 1;
        }
    }

    pruned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leaves_fresh_directories_alone() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(root.path().join("fresh")).await.unwrap();

        let pruned = prune_orphaned_clone_dirs(root.path(), StdDuration::from_secs(3600)).await;

        assert_eq!(pruned, 0);
        assert!(root.path().join("fresh").exists());
    }

    #[tokio::test]
    async fn removes_directories_older_than_threshold() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("stale");
        tokio::fs::create_dir(&stale).await.unwrap();

        // Back-date the threshold to zero so "now" already counts as stale.
        let pruned = prune_orphaned_clone_dirs(root.path(), StdDuration::from_secs(0)).await;

        assert_eq!(pruned, 1);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn second_run_against_same_root_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(root.path().join("stale")).await.unwrap();

        let first = prune_orphaned_clone_dirs(root.path(), StdDuration::from_secs(0)).await;
        let second = prune_orphaned_clone_dirs(root.path(), StdDuration::from_secs(0)).await;

        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
