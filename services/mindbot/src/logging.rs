//! Process-wide `tracing` subscriber setup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Builds the filter: our crates log at `level`, everything else at WARN.
///
/// The MCP plumbing is chatty at INFO, so it stays at WARN even in debug runs.
pub fn build_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_lowercase();
    EnvFilter::new(format!(
        "warn,mindbot={level},mindbot_core={level},mindbot_worker={level},rmcp=warn"
    ))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn setup_logging(level: Level) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .try_init();
    if installed.is_err() {
        tracing::debug!("Logging was already initialized");
    }
}
