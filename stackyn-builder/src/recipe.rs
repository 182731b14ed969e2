use std::path::Path;
use std::process::Stdio;

use stackyn_common::{Error, ErrorKind};
use tokio::process::Command;

use crate::detect::Runtime;

/// Fixed builder image used for every buildpacks invocation. Not
/// user-selectable in this version.
pub const BUILDER_IMAGE: &str = "paketobuildpacks/builder-jammy-base:latest";

/// Per-runtime Dockerfile templates used when buildpacks is unavailable
/// or the detected runtime has no buildpack support. `{PORT}` is always
/// 8080 — the platform's single internal routing port.
fn dockerfile_template(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Node => {
            "FROM node:20-slim\nWORKDIR /app\nCOPY package*.json ./\nRUN npm ci --omit=dev || npm install --omit=dev\nCOPY . .\nENV PORT=8080\nEXPOSE 8080\nCMD [\"npm\", \"start\"]\n"
        }
        Runtime::Python => {
            "FROM python:3.12-slim\nWORKDIR /app\nCOPY requirements.txt* ./\nRUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi\nCOPY . .\nENV PORT=8080\nEXPOSE 8080\nCMD [\"python\", \"main.py\"]\n"
        }
        Runtime::Go => {
            "FROM golang:1.22 AS build\nWORKDIR /app\nCOPY . .\nRUN go build -o /out/app .\n\nFROM debian:bookworm-slim\nCOPY --from=build /out/app /app\nENV PORT=8080\nEXPOSE 8080\nCMD [\"/app\"]\n"
        }
        Runtime::Java => {
            "FROM eclipse-temurin:21-jdk AS build\nWORKDIR /app\nCOPY . .\nRUN ./mvnw -q -DskipTests package || gradle build -x test\n\nFROM eclipse-temurin:21-jre\nCOPY --from=build /app/target/*.jar /app/app.jar\nENV PORT=8080\nEXPOSE 8080\nCMD [\"java\", \"-jar\", \"/app/app.jar\"]\n"
        }
        Runtime::Ruby => {
            "FROM ruby:3.3-slim\nWORKDIR /app\nCOPY Gemfile* ./\nRUN bundle install\nCOPY . .\nENV PORT=8080\nEXPOSE 8080\nCMD [\"bundle\", \"exec\", \"ruby\", \"app.rb\"]\n"
        }
        Runtime::Php => {
            "FROM php:8.3-apache\nCOPY . /var/www/html\nRUN a2enmod rewrite\nENV PORT=8080\nRUN sed -ri 's/Listen 80/Listen 8080/' /etc/apache2/ports.conf\nEXPOSE 8080\n"
        }
        Runtime::Static => {
            "FROM nginx:1.27-alpine\nCOPY . /usr/share/nginx/html\nENV PORT=8080\nRUN sed -ri 's/listen\\s+80;/listen 8080;/' /etc/nginx/conf.d/default.conf\nEXPOSE 8080\n"
        }
    }
}

/// Whether the buildpacks CLI (`pack`) is installed and can be used for
/// this runtime at all.
async fn buildpacks_available(runtime: Runtime) -> bool {
    if matches!(runtime, Runtime::Php) {
        // no first-class Paketo buildpack for PHP in this builder image.
        return false;
    }
    Command::new("pack")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// The synthesized image tag for a build job:
/// `{imageNamePrefix}-{appId}:{buildJobId}`.
pub fn image_tag(image_name_prefix: &str, app_id: &str, build_job_id: &str) -> String {
    format!("{image_name_prefix}-{app_id}:{build_job_id}")
}

/// A resolved build recipe: either invoke `pack build` directly, or build
/// from a synthesized Dockerfile written into the clone directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipe {
    Buildpacks,
    Dockerfile,
}

/// Chooses buildpacks when available for this runtime, else writes a
/// per-runtime Dockerfile template into the clone directory and falls
/// back to it.
pub async fn resolve(clone_dir: &Path, runtime: Runtime) -> Result<Recipe, Error> {
    if buildpacks_available(runtime).await {
        return Ok(Recipe::Buildpacks);
    }

    let dockerfile = dockerfile_template(runtime);
    tokio::fs::write(clone_dir.join("Dockerfile"), dockerfile)
        .await
        .map_err(|err| Error::new(ErrorKind::BuildFailed, "failed to synthesize fallback Dockerfile").with_details(err.to_string()))?;

    Ok(Recipe::Dockerfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tag_uses_prefix_app_and_build_job() {
        assert_eq!(
            image_tag("stackyn", "01HAPP", "01HBUILD"),
            "stackyn-01HAPP:01HBUILD"
        );
    }

    #[test]
    fn every_runtime_has_a_fallback_template() {
        for runtime in [
            Runtime::Node,
            Runtime::Python,
            Runtime::Go,
            Runtime::Java,
            Runtime::Ruby,
            Runtime::Php,
            Runtime::Static,
        ] {
            assert!(dockerfile_template(runtime).contains("PORT"));
        }
    }
}
