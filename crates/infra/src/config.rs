//! Configuration loading and representation.
//!
//! Configuration comes from environment variables read once at startup.
//! Unset or unparsable values fall back to defaults (with a warning for the
//! unparsable case).

use std::time::Duration;

use tracing::warn;

/// Default number of concurrent render calls per batch.
pub const DEFAULT_RENDER_CONCURRENCY: usize = 4;

/// Default per-item render timeout.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle time before an unsettled delivery is handed out again.
pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum concurrent render calls within one batch (at least 1).
    pub render_concurrency: usize,
    /// Per-item render timeout; `None` waits for the renderer indefinitely.
    pub render_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_concurrency: DEFAULT_RENDER_CONCURRENCY,
            render_timeout: Some(DEFAULT_RENDER_TIMEOUT),
        }
    }
}

impl PipelineConfig {
    pub fn with_render_concurrency(mut self, concurrency: usize) -> Self {
        self.render_concurrency = concurrency.max(1);
        self
    }

    pub fn with_render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.render_timeout = timeout;
        self
    }
}

/// Queue trigger worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTriggerConfig {
    /// Name for logging
    pub name: String,
    /// Receive timeout; also bounds how long shutdown waits for an idle worker
    pub poll_interval: Duration,
}

impl Default for QueueTriggerConfig {
    fn default() -> Self {
        Self {
            name: "batch-queue-trigger".to_string(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl QueueTriggerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub api_prefix: String,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub queue_key: String,
    pub queue_max_deliveries: u32,
    pub queue_visibility_timeout: Duration,
    pub pipeline: PipelineConfig,
    pub trigger: QueueTriggerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            api_prefix: "/api".to_string(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
            queue_key: "docgen:batches".to_string(),
            queue_max_deliveries: 5,
            queue_visibility_timeout: DEFAULT_QUEUE_VISIBILITY_TIMEOUT,
            pipeline: PipelineConfig::default(),
            trigger: QueueTriggerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let render_timeout = match parse_or("RENDER_TIMEOUT_MS", &lookup, 30_000u64) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            api_prefix: normalize_prefix(lookup("API_PREFIX").unwrap_or(defaults.api_prefix)),
            use_persistent_stores: parse_or("USE_PERSISTENT_STORES", &lookup, false),
            database_url: lookup("DATABASE_URL"),
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_key: lookup("BATCH_QUEUE_KEY").unwrap_or(defaults.queue_key),
            queue_max_deliveries: parse_or("QUEUE_MAX_DELIVERIES", &lookup, defaults.queue_max_deliveries)
                .max(1),
            queue_visibility_timeout: Duration::from_millis(
                parse_or("QUEUE_VISIBILITY_TIMEOUT_MS", &lookup, 30_000u64).max(1),
            ),
            pipeline: PipelineConfig::default()
                .with_render_concurrency(parse_or(
                    "RENDER_CONCURRENCY",
                    &lookup,
                    DEFAULT_RENDER_CONCURRENCY,
                ))
                .with_render_timeout(render_timeout),
            trigger: QueueTriggerConfig::default().with_poll_interval(Duration::from_millis(
                parse_or("QUEUE_POLL_INTERVAL_MS", &lookup, 250u64).max(1),
            )),
        }
    }
}

fn parse_or<T>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "invalid config value; using default");
                default
            }
        },
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
