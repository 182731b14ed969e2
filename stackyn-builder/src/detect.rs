use std::path::Path;

use regex::Regex;
use stackyn_common::{Error, ErrorKind};

/// The runtimes this platform recognizes, in fingerprint priority
/// order. First match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Node,
    Python,
    Go,
    Java,
    Ruby,
    Php,
    Static,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Python => "python",
            Runtime::Go => "go",
            Runtime::Java => "java",
            Runtime::Ruby => "ruby",
            Runtime::Php => "php",
            Runtime::Static => "static",
        }
    }
}

/// Fingerprints the clone directory's top level for a recognized
/// manifest file, in priority order. Returns
/// [`ErrorKind::RuntimeNotDetected`] if nothing matches.
pub fn detect_runtime(dir: &Path) -> Result<Runtime, Error> {
    if dir.join("package.json").is_file() {
        return Ok(Runtime::Node);
    }
    if dir.join("requirements.txt").is_file()
        || dir.join("pyproject.toml").is_file()
        || dir.join("Pipfile").is_file()
        || has_extension(dir, "py")
    {
        return Ok(Runtime::Python);
    }
    if dir.join("go.mod").is_file() {
        return Ok(Runtime::Go);
    }
    if dir.join("pom.xml").is_file() || dir.join("build.gradle").is_file() || dir.join("build.gradle.kts").is_file() {
        return Ok(Runtime::Java);
    }
    if dir.join("Gemfile").is_file() {
        return Ok(Runtime::Ruby);
    }
    if dir.join("composer.json").is_file() {
        return Ok(Runtime::Php);
    }
    if dir.join("index.html").is_file() {
        return Ok(Runtime::Static);
    }

    Err(Error::new(
        ErrorKind::RuntimeNotDetected,
        "no recognized runtime manifest found in the repository",
    ))
}

fn has_extension(dir: &Path, ext: &str) -> bool {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .any(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some(ext))
}

/// A hardcoded listen port discovered by source inspection, plus a
/// human-readable warning. Non-fatal: the platform always injects
/// `PORT=8080` regardless.
#[derive(Debug, Clone)]
pub struct PortDetection {
    pub port: Option<u16>,
    pub warning: Option<String>,
}

/// Best-effort, non-blocking scan for a hardcoded port, skipped entirely
/// if the source already references the `PORT` environment variable.
pub fn detect_port(dir: &Path) -> PortDetection {
    let port_env_patterns = [
        Regex::new(r"process\.env\.PORT").unwrap(),
        Regex::new(r"os\.environ\[.PORT.\]").unwrap(),
        Regex::new(r"os\.Getenv\(.PORT.\)").unwrap(),
        Regex::new(r"ENV\[.PORT.\]").unwrap(),
        Regex::new(r"getenv\(.PORT.\)").unwrap(),
    ];
    let listen_patterns = [
        Regex::new(r"listen\((\d{2,5})\)").unwrap(),
        Regex::new(r"(?i)port\s*=\s*(\d{2,5})").unwrap(),
        Regex::new(r"server\.port\s*=\s*(\d{2,5})").unwrap(),
    ];

    let mut found: Option<u16> = None;
    let mut references_port_env = false;

    for path in source_files(dir).into_iter().take(2_000) {
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        if port_env_patterns.iter().any(|re| re.is_match(&contents)) {
            references_port_env = true;
            continue;
        }
        for re in &listen_patterns {
            if let Some(caps) = re.captures(&contents) {
                if let Some(port) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                    found = Some(port);
                    break;
                }
            }
        }
        if found.is_some() {
            break;
        }
    }

    if references_port_env {
        return PortDetection {
            port: None,
            warning: None,
        };
    }

    match found {
        Some(port) if port != 8080 => PortDetection {
            port: Some(port),
            warning: Some(format!(
                "detected hardcoded port {port}; the platform always routes to 8080 internally"
            )),
        },
        Some(port) => PortDetection {
            port: Some(port),
            warning: None,
        },
        None => PortDetection {
            port: None,
            warning: None,
        },
    }
}

fn source_files(dir: &Path) -> Vec<std::path::PathBuf> {
    const EXTENSIONS: [&str; 8] = ["js", "ts", "py", "go", "java", "rb", "php", "kt"];
    let mut out = Vec::new();
    collect(dir, &EXTENSIONS, &mut out);
    out
}

fn collect(dir: &Path, extensions: &[&str], out: &mut Vec<std::path::PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(".git")
                || path.file_name().and_then(|n| n.to_str()) == Some("node_modules")
            {
                continue;
            }
            collect(&path, extensions, out);
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if extensions.contains(&ext) {
                out.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_node_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_runtime(dir.path()).unwrap(), Runtime::Node);
    }

    #[test]
    fn detects_python_from_requirements() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask").unwrap();
        assert_eq!(detect_runtime(dir.path()).unwrap(), Runtime::Python);
    }

    #[test]
    fn node_takes_priority_over_python() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask").unwrap();
        assert_eq!(detect_runtime(dir.path()).unwrap(), Runtime::Node);
    }

    #[test]
    fn no_manifest_is_runtime_not_detected() {
        let dir = tempfile::tempdir().unwrap();
        let err = detect_runtime(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorKind::RuntimeNotDetected);
    }

    #[test]
    fn port_env_reference_suppresses_detection() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "app.listen(process.env.PORT)").unwrap();
        let detection = detect_port(dir.path());
        assert!(detection.port.is_none());
        assert!(detection.warning.is_none());
    }

    #[test]
    fn hardcoded_non_8080_port_warns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app.js"), "app.listen(3000)").unwrap();
        let detection = detect_port(dir.path());
        assert_eq!(detection.port, Some(3000));
        assert!(detection.warning.is_some());
    }
}
