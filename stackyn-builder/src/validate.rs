use std::path::Path;

use stackyn_common::{Error, ErrorKind};

/// MVP constraint caps, chosen generously enough not to reject ordinary
/// small services while still bounding worst-case disk/build time.
pub const MAX_REPO_SIZE_BYTES: u64 = 500 * 1024 * 1024;
pub const MAX_FILE_COUNT: usize = 20_000;

struct Walked {
    total_bytes: u64,
    file_count: usize,
    top_level_dirs: Vec<String>,
}

fn walk(dir: &Path) -> std::io::Result<Walked> {
    let mut total_bytes = 0u64;
    let mut file_count = 0usize;
    let mut top_level_dirs = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_dir() {
            if name != ".git" {
                top_level_dirs.push(name);
            }
            let sub = walk_recursive(&entry.path())?;
            total_bytes += sub.0;
            file_count += sub.1;
        } else if file_type.is_file() {
            total_bytes += entry.metadata()?.len();
            file_count += 1;
        }
    }

    Ok(Walked {
        total_bytes,
        file_count,
        top_level_dirs,
    })
}

fn walk_recursive(dir: &Path) -> std::io::Result<(u64, usize)> {
    let mut bytes = 0u64;
    let mut count = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            let (b, c) = walk_recursive(&entry.path())?;
            bytes += b;
            count += c;
        } else if file_type.is_file() {
            bytes += entry.metadata()?.len();
            count += 1;
        }
    }
    Ok((bytes, count))
}

/// Monorepo heuristic: more than one top-level directory that itself
/// contains a recognized manifest file.
fn looks_like_monorepo(root: &Path, top_level_dirs: &[String]) -> bool {
    const MANIFESTS: [&str; 7] = [
        "package.json",
        "requirements.txt",
        "go.mod",
        "pom.xml",
        "build.gradle",
        "Gemfile",
        "composer.json",
    ];

    let count = top_level_dirs
        .iter()
        .filter(|dir| MANIFESTS.iter().any(|m| root.join(dir).join(m).is_file()))
        .count();

    count > 1
}

/// Enforces the MVP constraint set against a freshly cloned directory,
/// fail-fast with the first distinguished error kind encountered.
pub fn validate_constraints(clone_dir: &Path) -> Result<(), Error> {
    if clone_dir.join("Dockerfile").is_file() {
        return Err(Error::new(
            ErrorKind::DockerfilePresent,
            "repository provides its own Dockerfile; bring-your-own-Dockerfile is unsupported",
        ));
    }
    if clone_dir.join("docker-compose.yml").is_file() || clone_dir.join("docker-compose.yaml").is_file() {
        return Err(Error::new(
            ErrorKind::DockerComposePresent,
            "repository provides a docker-compose file; multi-service repositories are unsupported",
        ));
    }

    let walked = walk(clone_dir).map_err(Error::internal)?;

    if walked.total_bytes > MAX_REPO_SIZE_BYTES {
        return Err(Error::new(ErrorKind::RepoTooLarge, "repository exceeds the maximum build size")
            .with_details(format!("{} bytes", walked.total_bytes)));
    }
    if walked.file_count > MAX_FILE_COUNT {
        return Err(Error::new(ErrorKind::RepoTooLarge, "repository exceeds the maximum file count")
            .with_details(format!("{} files", walked.file_count)));
    }
    if looks_like_monorepo(clone_dir, &walked.top_level_dirs) {
        return Err(Error::new(
            ErrorKind::MonorepoDetected,
            "repository looks like a monorepo with multiple independently buildable services",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_dockerfile_present() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        let err = validate_constraints(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorKind::DockerfilePresent);
    }

    #[test]
    fn rejects_docker_compose_present() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "version: '3'").unwrap();
        let err = validate_constraints(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorKind::DockerComposePresent);
    }

    #[test]
    fn accepts_ordinary_single_service_repo() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("index.js"), "console.log(1)").unwrap();
        validate_constraints(dir.path()).unwrap();
    }

    #[test]
    fn detects_monorepo_with_two_manifest_bearing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("api")).unwrap();
        fs::write(dir.path().join("api").join("package.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("web")).unwrap();
        fs::write(dir.path().join("web").join("package.json"), "{}").unwrap();
        let err = validate_constraints(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorKind::MonorepoDetected);
    }
}
