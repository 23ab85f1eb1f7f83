//! Orchestrator configuration.
//!
//! [`BuildConfig`] carries the knobs a deployment actually varies: where the
//! execution service lives, which delivery strategy to force (if any), how
//! often to poll, and the minimum visible build duration. Defaults resolve
//! environment overrides through `dotenvy` so a `.env` file works the same
//! as real environment variables.

use std::time::Duration;

use crate::delivery::DeliveryMode;

/// Configuration for a [`crate::driver::FlowDriver`].
#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Base URL of the execution service API, without a trailing slash.
    pub base_url: String,
    /// Force one delivery strategy instead of the DIRECT-first fallback
    /// chain.
    pub delivery: Option<DeliveryMode>,
    /// Interval between event polls in POLLING mode.
    pub poll_interval: Duration,
    /// Minimum visible build duration per vertex. Pacing only; zero disables
    /// it.
    pub min_vertex_duration: Duration,
    /// Ask the service to persist per-vertex build records.
    pub log_builds: bool,
}

impl BuildConfig {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:7860/api/v1";
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_MIN_VERTEX_DURATION: Duration = Duration::from_millis(300);

    fn resolve_base_url(provided: Option<String>) -> String {
        if let Some(url) = provided {
            return url;
        }
        dotenvy::dotenv().ok();
        std::env::var("FLOWBUILD_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string())
    }

    fn resolve_delivery() -> Option<DeliveryMode> {
        std::env::var("FLOWBUILD_EVENT_DELIVERY")
            .ok()
            .and_then(|raw| raw.parse().ok())
    }

    fn resolve_poll_interval() -> Duration {
        std::env::var("FLOWBUILD_POLL_INTERVAL_MS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Self::DEFAULT_POLL_INTERVAL)
    }

    /// Configuration pointing at an explicit base URL, with defaults for
    /// everything else.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Self::resolve_base_url(Some(base_url.into())),
            delivery: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            min_vertex_duration: Self::DEFAULT_MIN_VERTEX_DURATION,
            log_builds: true,
        }
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = Some(delivery);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_min_vertex_duration(mut self, duration: Duration) -> Self {
        self.min_vertex_duration = duration;
        self
    }

    #[must_use]
    pub fn with_log_builds(mut self, log_builds: bool) -> Self {
        self.log_builds = log_builds;
        self
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            base_url: Self::resolve_base_url(None),
            delivery: Self::resolve_delivery(),
            poll_interval: Self::resolve_poll_interval(),
            min_vertex_duration: Self::DEFAULT_MIN_VERTEX_DURATION,
            log_builds: true,
        }
    }
}
