//! Conversion engine discovery.
//!
//! The [`EngineLocator`] resolves the path of the headless office engine once
//! at startup, from configuration or from `PATH`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;

/// Executable names tried in `PATH`, in order.
const ENGINE_CANDIDATES: &[&str] = &["soffice", "libreoffice"];

/// Upper bound for the `--version` probe.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for the engine, returned by [`EngineLocator::info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Executable name.
    pub name: String,
    /// Whether an executable was found.
    pub available: bool,
    /// Version string (first line of `--version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Resolved engine location.
#[derive(Debug, Clone)]
pub struct EngineLocator {
    path: Option<PathBuf>,
}

impl EngineLocator {
    /// Discover the engine.
    ///
    /// If the [`lc_core::config::EngineConfig`] supplies a path **and** that
    /// path exists, it is used directly. Otherwise [`which::which`] is tried
    /// for each known executable name.
    pub fn discover(config: &lc_core::config::EngineConfig) -> Self {
        if let Some(ref p) = config.path {
            if p.exists() {
                return Self {
                    path: Some(p.clone()),
                };
            }
            tracing::warn!(
                "Configured engine path {} does not exist; searching PATH",
                p.display()
            );
        }

        let path = ENGINE_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok());

        Self { path }
    }

    /// Use an explicit executable without any lookup.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// The resolved path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The program to invoke. Falls back to the bare `soffice` name so the
    /// failure surfaces as a spawn error on the conversion request.
    pub fn program(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(ENGINE_CANDIDATES[0]))
    }

    /// Report availability and version.
    ///
    /// The version probe runs the engine with a timeout; an engine that
    /// hangs on `--version` is reported as available with no version.
    pub async fn info(&self) -> EngineInfo {
        match self.path {
            Some(ref path) => EngineInfo {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| ENGINE_CANDIDATES[0].to_string()),
                available: true,
                version: detect_version(path, VERSION_TIMEOUT).await,
                path: Some(path.clone()),
            },
            None => EngineInfo {
                name: ENGINE_CANDIDATES[0].to_string(),
                available: false,
                version: None,
                path: None,
            },
        }
    }
}

/// Run `<engine> --version` and return the first line of stdout.
async fn detect_version(path: &Path, timeout: Duration) -> Option<String> {
    let output = ToolCommand::new(path.to_path_buf())
        .arg("--version")
        .timeout(timeout)
        .execute()
        .await
        .map_err(|e| tracing::debug!("Engine version probe failed: {e}"))
        .ok()?;

    output
        .stdout
        .lines()
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
