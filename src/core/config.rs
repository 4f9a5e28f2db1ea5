use once_cell::sync::{Lazy, OnceCell};

#[cfg(target_os = "windows")]
const DEFAULT_PROGRAM: &str = "youtube-dl.exe";
#[cfg(not(target_os = "windows"))]
const DEFAULT_PROGRAM: &str = "./youtube-dl";

/// Homepage of the external extractor project.
pub const WEBSITE_URL: &str = "http://ytdl-org.github.io/youtube-dl/";

/// Extractor program invoked by every component.
///
/// Read once at startup from the `YTDL_BIN` environment variable. The
/// default is the bare platform name, resolved against the working directory
/// on POSIX.
pub static YTDL_BIN: Lazy<String> =
    Lazy::new(|| std::env::var("YTDL_BIN").unwrap_or_else(|_| DEFAULT_PROGRAM.to_string()));

static USER_AGENT: OnceCell<String> = OnceCell::new();

static VERSION: OnceCell<String> = OnceCell::new();

/// Sets the shared user-agent override passed to every probe and download.
/// Write-once; later calls are ignored.
pub fn set_user_agent(user_agent: &str) {
    let _ = USER_AGENT.set(user_agent.to_string());
}

/// The shared user-agent override; empty when unset.
pub fn user_agent() -> String {
    USER_AGENT.get().cloned().unwrap_or_default()
}

pub(crate) fn memoized_version() -> Option<String> {
    VERSION.get().cloned()
}

pub(crate) fn memoize_version(version: &str) {
    let _ = VERSION.set(version.to_string());
}
