use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::notify::{HandlerKind, HandlerRequest};

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::None
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./collector.db")
}

/// Encoding of the UDP datagram payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// One JSON object or an array of objects per datagram
    #[default]
    Json,

    /// Newline-terminated `source metric value timestamp_ms [k=v,..]` lines
    Line,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub format: WireFormat,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            format: WireFormat::default(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

fn default_bind() -> String {
    format!("{}:{}", crate::util::get_addr(), crate::util::get_port())
}

fn default_max_datagram_size() -> usize {
    65_507
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Workers spawned at startup
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    /// Bounded inbound buffer of every worker
    #[serde(default = "default_worker_inbound_capacity")]
    pub worker_inbound_capacity: usize,

    /// Capacity of the shared sample queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a worker waits on a full queue before dropping the sample
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Oldest accepted sample, relative to now
    #[serde(default = "default_max_sample_age_secs")]
    pub max_sample_age_secs: u64,

    /// How far into the future an agent clock may drift
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,

    /// Metrics written to the store as raw samples instead of being aggregated
    #[serde(default)]
    pub passthrough_metrics: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            initial_workers: default_initial_workers(),
            worker_inbound_capacity: default_worker_inbound_capacity(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            max_sample_age_secs: default_max_sample_age_secs(),
            max_future_skew_secs: default_max_future_skew_secs(),
            passthrough_metrics: Vec::new(),
        }
    }
}

impl CollectorConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn max_sample_age(&self) -> Duration {
        Duration::from_secs(self.max_sample_age_secs)
    }

    pub fn max_future_skew(&self) -> Duration {
        Duration::from_secs(self.max_future_skew_secs)
    }
}

fn default_initial_workers() -> usize {
    2
}

fn default_worker_inbound_capacity() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_enqueue_timeout_ms() -> u64 {
    50
}

fn default_max_sample_age_secs() -> u64 {
    3600
}

fn default_max_future_skew_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_aggregation_tick_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_flush_retry_attempts")]
    pub flush_retry_attempts: u32,
    #[serde(default = "default_flush_retry_backoff_ms")]
    pub flush_retry_backoff_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_aggregation_tick_ms(),
            window_secs: default_window_secs(),
            grace_period_secs: default_grace_period_secs(),
            flush_retry_attempts: default_flush_retry_attempts(),
            flush_retry_backoff_ms: default_flush_retry_backoff_ms(),
        }
    }
}

impl AggregationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn flush_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_retry_backoff_ms)
    }
}

fn default_aggregation_tick_ms() -> u64 {
    1000
}

fn default_window_secs() -> u64 {
    10
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_flush_retry_attempts() -> u32 {
    3
}

fn default_flush_retry_backoff_ms() -> u64 {
    200
}

/// Scaling policy consulted by the scale scheduler
#[derive(Debug, Clone, Deserialize)]
pub struct ScalePolicy {
    #[serde(default = "default_scale_tick_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Below this load the pool shrinks
    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: f64,
    /// Above this load the pool grows
    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: f64,
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Workers added or removed per scale action
    #[serde(default = "default_step")]
    pub step: usize,
    /// Consecutive saturated ticks at `max_workers` before alerting
    #[serde(default = "default_saturation_grace")]
    pub saturation_grace: usize,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_scale_tick_ms(),
            cooldown_secs: default_cooldown_secs(),
            lower_threshold: default_lower_threshold(),
            upper_threshold: default_upper_threshold(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            step: default_step(),
            saturation_grace: default_saturation_grace(),
        }
    }
}

impl ScalePolicy {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Clamp a worker count into `[min_workers, max_workers]`
    pub fn clamp(&self, workers: usize) -> usize {
        workers.clamp(self.min_workers, self.max_workers)
    }
}

fn default_scale_tick_ms() -> u64 {
    5000
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_lower_threshold() -> f64 {
    0.2
}

fn default_upper_threshold() -> f64 {
    0.8
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    16
}

fn default_step() -> usize {
    1
}

fn default_saturation_grace() -> usize {
    3
}

/// A notification handler declared in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    #[serde(rename = "type")]
    pub kind: HandlerKind,
    #[serde(flatten)]
    pub request: HandlerRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_bind")]
    pub bind: SocketAddr,
    pub auth_token: Option<String>,
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            auth_token: None,
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_api_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_enable_cors() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub scale: ScalePolicy,

    /// Storage configuration (defaults to in-memory)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub notifications: Vec<HandlerConfig>,

    /// Management API (disabled when absent)
    pub api: Option<ApiSettings>,
}

/// Upper bound for `max_sample_age_secs` and `max_future_skew_secs` (ten years)
pub const MAX_SAMPLE_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// A configuration value that can never work at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError(msg.to_string()));

        let collector = &self.collector;
        if collector.queue_capacity == 0 {
            return fail("collector.queue_capacity must be greater than zero");
        }
        if collector.worker_inbound_capacity == 0 {
            return fail("collector.worker_inbound_capacity must be greater than zero");
        }
        if collector.max_sample_age_secs > MAX_SAMPLE_WINDOW_SECS
            || collector.max_future_skew_secs > MAX_SAMPLE_WINDOW_SECS
        {
            return fail("collector sample age and future skew must not exceed ten years");
        }
        if self.ingress.max_datagram_size == 0 {
            return fail("ingress.max_datagram_size must be greater than zero");
        }

        let aggregation = &self.aggregation;
        if aggregation.window_secs == 0 {
            return fail("aggregation.window_secs must be greater than zero");
        }
        if aggregation.tick_interval_ms == 0 {
            return fail("aggregation.tick_interval_ms must be greater than zero");
        }

        let scale = &self.scale;
        if !(scale.lower_threshold > 0.0 && scale.upper_threshold <= 1.0) {
            return fail("scale thresholds must lie within (0, 1]");
        }
        if scale.lower_threshold >= scale.upper_threshold {
            return fail("scale.lower_threshold must be below scale.upper_threshold");
        }
        if scale.max_workers == 0 {
            return fail("scale.max_workers must be greater than zero");
        }
        if scale.min_workers > scale.max_workers {
            return fail("scale.min_workers must not exceed scale.max_workers");
        }
        if scale.step == 0 {
            return fail("scale.step must be greater than zero");
        }
        if collector.initial_workers < scale.min_workers
            || collector.initial_workers > scale.max_workers
        {
            return fail("collector.initial_workers must lie within [min_workers, max_workers]");
        }
        if scale.tick_interval_ms == 0 || scale.tick_interval() >= scale.cooldown() {
            return fail("scale.tick_interval_ms must be non-zero and shorter than the cooldown");
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
