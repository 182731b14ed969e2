use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bollard::image::BuildImageOptions;
use bollard::Docker;
use futures::StreamExt;
use stackyn_common::{Error, ErrorKind};
use tokio::process::Command;
use tracing::{info, warn};

use crate::recipe::Recipe;

/// Build deadline: on timeout the task fails with `BUILD_TIMEOUT`
/// regardless of which recipe path ran.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Writes simultaneously to the worker's own stdout and an append-only
/// log sink: one leg for operational observability, the other flushed
/// to the log persister via [`stackyn_logs::LogWriter`].
pub struct MultiWriter<W: Write> {
    console: std::io::Stdout,
    sink: W,
}

impl<W: Write> MultiWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            console: std::io::stdout(),
            sink,
        }
    }
}

impl<W: Write> Write for MultiWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let _ = self.console.write(buf);
        self.sink.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let _ = self.console.flush();
        self.sink.flush()
    }
}

/// Packages the clone directory as an uncompressed tar, the build
/// context format the container engine's build API expects.
fn tar_build_context(clone_dir: &Path) -> Result<Vec<u8>, Error> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", clone_dir)
        .map_err(|err| Error::new(ErrorKind::BuildFailed, "failed to package build context").with_details(err.to_string()))?;
    builder
        .into_inner()
        .map_err(|err| Error::new(ErrorKind::BuildFailed, "failed to finalize build context").with_details(err.to_string()))
}

/// Runs the image build under the recipe chosen by [`crate::recipe::resolve`],
/// streaming output into `writer`, bounded by [`BUILD_TIMEOUT`].
pub async fn build_image<W: Write + Send + 'static>(
    docker: &Docker,
    clone_dir: &Path,
    recipe: Recipe,
    tag: &str,
    mut writer: MultiWriter<W>,
) -> Result<(), Error> {
    let build = async {
        match recipe {
            Recipe::Buildpacks => build_with_buildpacks(clone_dir, tag, &mut writer).await,
            Recipe::Dockerfile => build_with_dockerfile(docker, clone_dir, tag, &mut writer).await,
        }
    };

    match tokio::time::timeout(BUILD_TIMEOUT, build).await {
        Ok(result) => result,
        Err(_) => {
            let _ = writeln!(writer, "build timed out after {}s", BUILD_TIMEOUT.as_secs());
            Err(Error::new(ErrorKind::BuildTimeout, "image build exceeded the deadline"))
        }
    }
}

async fn build_with_buildpacks<W: Write>(clone_dir: &Path, tag: &str, writer: &mut MultiWriter<W>) -> Result<(), Error> {
    use std::process::Stdio;

    let mut child = Command::new("pack")
        .args([
            "build",
            tag,
            "--path",
            &clone_dir.to_string_lossy(),
            "--builder",
            crate::recipe::BUILDER_IMAGE,
            "--trust-builder",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(Error::internal)?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let mut stdout_lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdout));
    let mut stderr_lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stderr));

    loop {
        tokio::select! {
            line = stdout_lines.next_line() => {
                match line {
                    Ok(Some(line)) => { let _ = writeln!(writer, "{line}"); }
                    Ok(None) => break,
                    Err(err) => { warn!(error = ?err, "error reading pack build stdout"); break; }
                }
            }
            line = stderr_lines.next_line() => {
                if let Ok(Some(line)) = line {
                    let _ = writeln!(writer, "{line}");
                }
            }
        }
    }

    let status = child.wait().await.map_err(Error::internal)?;
    if !status.success() {
        return Err(Error::new(ErrorKind::BuildFailed, "buildpacks build failed"));
    }
    Ok(())
}

async fn build_with_dockerfile<W: Write>(
    docker: &Docker,
    clone_dir: &Path,
    tag: &str,
    writer: &mut MultiWriter<W>,
) -> Result<(), Error> {
    let context = tar_build_context(clone_dir)?;

    let options = BuildImageOptions {
        dockerfile: "Dockerfile",
        t: tag,
        rm: true,
        ..Default::default()
    };

    let mut stream = docker.build_image(options, None, Some(context.into()));

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(info) => {
                if let Some(stream_text) = info.stream {
                    let _ = write!(writer, "{stream_text}");
                }
                if let Some(error_text) = info.error {
                    let _ = writeln!(writer, "{error_text}");
                    return Err(Error::new(ErrorKind::BuildFailed, "docker build failed").with_details(error_text));
                }
            }
            Err(err) => {
                let _ = writeln!(writer, "{err}");
                return Err(Error::new(ErrorKind::BuildFailed, "docker build stream error").with_details(err.to_string()));
            }
        }
    }

    info!(tag, "image built");
    Ok(())
}
