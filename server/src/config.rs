use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub pipeline: PipelineConfig,
    pub ingestion: IngestionConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub fe_host: String,
    pub fe_query_port: u16,
    pub fe_http_port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            fe_host: "127.0.0.1".to_string(),
            fe_query_port: 9030,
            fe_http_port: 8030,
            user: "root".to_string(),
            password: String::new(),
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on concurrently executing collection descriptors.
    pub collect_parallelism: usize,
    /// Per-descriptor execution timeout in seconds.
    pub query_timeout_secs: u64,
    /// Whole tool-call deadline in seconds.
    pub call_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { collect_parallelism: 8, query_timeout_secs: 30, call_timeout_secs: 120 }
    }
}

impl PipelineConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Rows older than this window are read from the historical loads table,
    /// newer ones from the live table; overlap is deduplicated by
    /// (label, job_id).
    pub history_dedup_window_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self { history_dedup_window_secs: 120 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    /// Clamped to 0.3 at load time; the failure classifier needs
    /// near-deterministic output.
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { enabled: true, timeout_secs: 15, temperature: 0.2, max_tokens: 2048 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

/// Per-domain threshold overrides. Everything analyzers classify against is
/// settable here; the Rule Library is the only consumer.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RulesConfig {
    pub compaction: CompactionRulesConfig,
    pub ingestion: IngestionRulesConfig,
    pub memory: MemoryRulesConfig,
    pub query_perf: QueryPerfRulesConfig,
    pub operations: OperationsRulesConfig,
    pub profile: ProfileRulesConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CompactionRulesConfig {
    pub score_excellent: Option<f64>,
    pub score_normal: Option<f64>,
    pub score_warning: Option<f64>,
    pub score_critical: Option<f64>,
    pub score_emergency: Option<f64>,
    pub min_threads_per_core: Option<f64>,
    pub max_threads_per_core: Option<f64>,
    pub abs_min_threads: Option<i64>,
    pub abs_max_threads: Option<i64>,
    pub max_healthy_tasks_per_node: Option<i64>,
    pub slow_task_hours: Option<f64>,
    pub max_task_retries: Option<i64>,
    pub healthy_success_pct: Option<f64>,
    pub min_recommended_max_tasks: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IngestionRulesConfig {
    pub pending_critical: Option<usize>,
    pub pending_warning: Option<usize>,
    pub long_running_hours: Option<f64>,
    pub failure_rate_warning_pct: Option<f64>,
    pub failure_rate_critical_pct: Option<f64>,
    pub min_jobs_for_rate: Option<usize>,
    pub frequency_per_min_warning: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MemoryRulesConfig {
    pub usage_pct_excellent: Option<f64>,
    pub usage_pct_normal: Option<f64>,
    pub usage_pct_warning: Option<f64>,
    pub usage_pct_critical: Option<f64>,
    pub tracker_share_warning: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueryPerfRulesConfig {
    pub slow_query_warning_secs: Option<f64>,
    pub slow_query_critical_secs: Option<f64>,
    pub scan_rows_large: Option<i64>,
    pub queue_pending_warning: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OperationsRulesConfig {
    pub disk_used_pct_warning: Option<f64>,
    pub disk_used_pct_critical: Option<f64>,
    pub tablet_skew_ratio: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProfileRulesConfig {
    pub wait_ratio: Option<f64>,
    pub replica_wait_ratio: Option<f64>,
    pub severe_wait_ratio: Option<f64>,
    pub unaccounted_ratio: Option<f64>,
}

impl Config {
    /// Load configuration with environment variable override support
    ///
    /// Loading order:
    /// 1. Load from config.toml file
    /// 2. Override with environment variables (prefixed with APP_)
    /// 3. Validate the final configuration
    pub fn load() -> Result<Self, anyhow::Error> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path, e))?;
        tracing::info!("Loaded configuration from {}", path);
        Ok(config)
    }

    fn find_config_file() -> Option<String> {
        let candidates =
            ["config.toml", "conf/config.toml", "/etc/starrocks-doctor/config.toml"];
        candidates
            .iter()
            .find(|p| Path::new(p).exists())
            .map(|p| p.to_string())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_FE_HOST: frontend host
    /// - APP_FE_QUERY_PORT: frontend MySQL-protocol port (default: 9030)
    /// - APP_FE_HTTP_PORT: frontend HTTP port (default: 8030)
    /// - APP_FE_USER / APP_FE_PASSWORD: probe credentials
    /// - APP_LOG_LEVEL: tracing filter (e.g. "info,starrocks_doctor=debug")
    /// - APP_COLLECT_PARALLELISM: collect-stage parallelism bound
    /// - APP_QUERY_TIMEOUT_SECS / APP_CALL_TIMEOUT_SECS: pipeline timeouts
    /// - APP_HISTORY_DEDUP_WINDOW_SECS: loads live/history dedup window
    /// - APP_LLM_ENABLED: enable/disable the LLM adapter (true/false)
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_FE_HOST") {
            self.cluster.fe_host = host;
            tracing::info!("Override cluster.fe_host from env: {}", self.cluster.fe_host);
        }

        if let Ok(port) = std::env::var("APP_FE_QUERY_PORT")
            && let Ok(port) = port.parse()
        {
            self.cluster.fe_query_port = port;
        }

        if let Ok(port) = std::env::var("APP_FE_HTTP_PORT")
            && let Ok(port) = port.parse()
        {
            self.cluster.fe_http_port = port;
        }

        if let Ok(user) = std::env::var("APP_FE_USER") {
            self.cluster.user = user;
        }

        if let Ok(password) = std::env::var("APP_FE_PASSWORD") {
            self.cluster.password = password;
            tracing::info!("Override cluster.password from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(par) = std::env::var("APP_COLLECT_PARALLELISM")
            && let Ok(par) = par.parse()
        {
            self.pipeline.collect_parallelism = par;
        }

        if let Ok(secs) = std::env::var("APP_QUERY_TIMEOUT_SECS")
            && let Ok(secs) = secs.parse()
        {
            self.pipeline.query_timeout_secs = secs;
        }

        if let Ok(secs) = std::env::var("APP_CALL_TIMEOUT_SECS")
            && let Ok(secs) = secs.parse()
        {
            self.pipeline.call_timeout_secs = secs;
        }

        if let Ok(secs) = std::env::var("APP_HISTORY_DEDUP_WINDOW_SECS")
            && let Ok(secs) = secs.parse()
        {
            self.ingestion.history_dedup_window_secs = secs;
        }

        if let Ok(enabled) = std::env::var("APP_LLM_ENABLED") {
            self.llm.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&mut self) -> Result<(), anyhow::Error> {
        if self.cluster.fe_host.is_empty() {
            anyhow::bail!("cluster.fe_host must not be empty");
        }
        if self.pipeline.collect_parallelism == 0 {
            anyhow::bail!("pipeline.collect_parallelism must be at least 1");
        }
        if self.pipeline.query_timeout_secs == 0 || self.pipeline.call_timeout_secs == 0 {
            anyhow::bail!("pipeline timeouts must be non-zero");
        }
        if self.llm.temperature > 0.3 {
            tracing::warn!(
                "llm.temperature {} exceeds 0.3, clamping",
                self.llm.temperature
            );
            self.llm.temperature = 0.3;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.pipeline.collect_parallelism, 8);
        assert_eq!(config.pipeline.query_timeout_secs, 30);
        assert_eq!(config.ingestion.history_dedup_window_secs, 120);
        assert_eq!(config.cluster.fe_query_port, 9030);
    }

    #[test]
    fn temperature_is_clamped() {
        let mut config = Config::default();
        config.llm.temperature = 0.9;
        config.validate().unwrap();
        assert!(config.llm.temperature <= 0.3);
    }

    #[test]
    fn parses_partial_toml() {
        let toml = r#"
            [cluster]
            fe_host = "10.0.0.5"

            [rules.compaction]
            score_warning = 80.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cluster.fe_host, "10.0.0.5");
        assert_eq!(config.rules.compaction.score_warning, Some(80.0));
        // untouched sections keep defaults
        assert_eq!(config.pipeline.collect_parallelism, 8);
    }
}
