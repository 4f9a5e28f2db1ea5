//! One-shot operations on the extractor tool itself: version query,
//! self-upgrade, cache purge, extractor listing.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::config;
use crate::core::parse::simplify;
use crate::core::process::{command, std_command, ProcessError};

pub fn website() -> &'static str {
    config::WEBSITE_URL
}

/// Queries the tool version. Blocking and time expensive; use
/// [`version_async`] from the control thread. The first successful result is
/// memoized process-wide.
pub fn version() -> String {
    if let Some(version) = config::memoized_version() {
        return version;
    }
    let version = version_of(Path::new(config::YTDL_BIN.as_str()));
    if version != "unknown" {
        config::memoize_version(&version);
    }
    version
}

/// Probes a specific program, without memoization. Returns `"unknown"` when
/// the child cannot be run or prints nothing.
pub fn version_of(program: &Path) -> String {
    match std_command(program)
        .args(["--no-color", "--version"])
        .output()
    {
        Ok(output) => {
            let version = simplify(&String::from_utf8_lossy(&output.stdout));
            if version.is_empty() {
                "unknown".to_string()
            } else {
                version
            }
        }
        Err(_) => "unknown".to_string(),
    }
}

/// [`version`] on a blocking worker.
pub async fn version_async() -> String {
    tokio::task::spawn_blocking(version)
        .await
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Runs the tool's self-update and resolves once the child has exited,
/// successfully or not. Output is logged, never surfaced.
pub async fn upgrade() {
    upgrade_with(Path::new(config::YTDL_BIN.as_str())).await;
}

pub async fn upgrade_with(program: &Path) {
    match command(program)
        .args(["--no-color", "--update"])
        .output()
        .await
    {
        Ok(output) => {
            tracing::debug!(
                stdout = %simplify(&String::from_utf8_lossy(&output.stdout)),
                stderr = %simplify(&String::from_utf8_lossy(&output.stderr)),
                "upgrade output"
            );
            if output.status.success() {
                tracing::info!("upgraded");
            } else {
                tracing::warn!("could not upgrade");
            }
        }
        Err(err) => tracing::warn!(error = %err, "could not run the upgrade"),
    }
}

/// Purges the tool's on-disk cache. The purge is advisory: it always
/// reports done, and a sticky flag suppresses repeat runs for the owner's
/// lifetime.
pub struct CacheCleaner {
    program: PathBuf,
    cleaned: AtomicBool,
}

impl CacheCleaner {
    pub fn new() -> Self {
        Self::with_program(config::YTDL_BIN.as_str())
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Resolving means done, even when the child failed or crashed.
    pub async fn run(&self) {
        match command(&self.program)
            .args(["--no-color", "--rm-cache-dir"])
            .output()
            .await
        {
            Ok(output) if output.status.success() => tracing::debug!("cache cleaned"),
            Ok(_) => tracing::debug!("cache not cleaned"),
            Err(err) => tracing::debug!(error = %err, "cache clean did not run"),
        }
        self.cleaned.store(true, Ordering::SeqCst);
    }

    /// The tool cache location per the XDG standard: `$XDG_CACHE_HOME`, or
    /// `$HOME/.cache` when unset.
    pub fn cache_dir() -> PathBuf {
        match env::var("XDG_CACHE_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir().unwrap_or_default().join(".cache"),
        }
    }
}

impl Default for CacheCleaner {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects the extractor names and their descriptions with two parallel
/// children. Both lists keep empty entries, so names stay paired with blank
/// description lines.
pub async fn list_extractors() -> Result<(Vec<String>, Vec<String>), String> {
    list_extractors_with(Path::new(config::YTDL_BIN.as_str())).await
}

pub async fn list_extractors_with(program: &Path) -> Result<(Vec<String>, Vec<String>), String> {
    let (extractors, descriptions) = tokio::join!(
        command(program)
            .args(["--no-color", "--list-extractors"])
            .output(),
        command(program)
            .args(["--no-color", "--extractor-descriptions"])
            .output(),
    );
    Ok((lines_of(extractors)?, lines_of(descriptions)?))
}

fn lines_of(output: std::io::Result<std::process::Output>) -> Result<Vec<String>, String> {
    match output {
        Ok(output) if output.status.success() => Ok(String::from_utf8_lossy(&output.stdout)
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()),
        Ok(output) => Err(simplify(&String::from_utf8_lossy(&output.stderr))),
        Err(err) => Err(ProcessError::from_io(&err).to_string()),
    }
}
