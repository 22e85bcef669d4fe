use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `NURTURE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub conditions: ConditionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Scheduler Config ───────────────────────────────────────────────────

/// Sweep tuning. The sweep itself is stateless; `sweep_interval_secs` only
/// drives the in-process ticker of the service binary.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// A claimed log that has not been committed within this many seconds
    /// is dispatchable again.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

// ─── Condition Config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool { true }
fn default_metrics_port() -> u16 {
    9091
}
fn default_scheduler_enabled() -> bool { true }
fn default_batch_size() -> usize { 50 }
fn default_max_concurrency() -> usize { 8 }
fn default_call_timeout_ms() -> u64 { 30_000 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_claim_lease_secs() -> u64 { 300 }
fn default_window_days() -> u32 { 7 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }

    /// Never shorter than two call timeouts.
    pub fn claim_lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.claim_lease_secs).max(self.call_timeout() * 2)
    }
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            conditions: ConditionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("NURTURE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
