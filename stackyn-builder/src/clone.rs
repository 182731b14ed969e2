use std::path::{Path, PathBuf};
use std::process::Stdio;

use stackyn_common::{Error, ErrorKind};
use tokio::process::Command;

/// Rewrites `git@host:owner/repo.git` / `ssh://git@host/owner/repo.git`
/// SSH remotes to their HTTPS equivalent. Anything already HTTPS passes
/// through unchanged.
pub fn normalize_to_https(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            return format!("https://{host}/{path}");
        }
    }
    if let Some(rest) = url.strip_prefix("ssh://git@") {
        return format!("https://{rest}");
    }
    url.to_string()
}

/// Deterministic per-build clone path:
/// `{clonePath}/{owner}_{repo}_{buildJobId}`.
pub fn clone_dir(clone_root: &Path, repo_url: &str, build_job_id: &str) -> PathBuf {
    let (owner, repo) = owner_repo(repo_url);
    clone_root.join(format!("{owner}_{repo}_{build_job_id}"))
}

fn owner_repo(url: &str) -> (String, String) {
    let https = normalize_to_https(url);
    let trimmed = https.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().unwrap_or("repo").to_string();
    let owner = parts.next().unwrap_or("owner").to_string();
    (owner, repo)
}

/// Shallow, single-branch clone. Surfaces
/// [`ErrorKind::RepoNotFound`] when the remote reports the repository
/// doesn't exist (git's "not found" / 404 phrasing for public GitHub
/// remotes); everything else maps to a generic clone failure.
pub async fn shallow_clone(repo_url: &str, branch: &str, dest: &Path) -> Result<(), Error> {
    let url = normalize_to_https(repo_url);

    let output = Command::new("git")
        .args([
            "clone",
            "--depth",
            "1",
            "--branch",
            branch,
            "--single-branch",
            &url,
            &dest.to_string_lossy(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(Error::internal)?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("not found") || stderr.contains("404") || stderr.contains("Repository not found") {
        return Err(Error::new(ErrorKind::RepoNotFound, "repository not found").with_details(stderr.into_owned()));
    }
    Err(Error::new(ErrorKind::BuildFailed, "git clone failed").with_details(stderr.into_owned()))
}

/// Resolved commit SHA of the freshly cloned `HEAD`.
pub async fn resolved_commit(repo_dir: &Path) -> Result<String, Error> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(Error::internal)?;

    if !output.status.success() {
        return Err(Error::new(ErrorKind::BuildFailed, "failed to resolve cloned commit"));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_scp_style_ssh_url() {
        assert_eq!(
            normalize_to_https("git@github.com:acme/widgets.git"),
            "https://github.com/acme/widgets.git"
        );
    }

    #[test]
    fn rewrites_ssh_scheme_url() {
        assert_eq!(
            normalize_to_https("ssh://git@github.com/acme/widgets.git"),
            "https://github.com/acme/widgets.git"
        );
    }

    #[test]
    fn leaves_https_url_untouched() {
        assert_eq!(
            normalize_to_https("https://github.com/acme/widgets.git"),
            "https://github.com/acme/widgets.git"
        );
    }

    #[test]
    fn clone_dir_is_deterministic() {
        let root = Path::new("/data/clones");
        let dir = clone_dir(root, "git@github.com:acme/widgets.git", "01HXYZ");
        assert_eq!(dir, PathBuf::from("/data/clones/acme_widgets_01HXYZ"));
    }
}
