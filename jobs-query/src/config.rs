use anyhow::{Context, Result};
use jobs_core::QueryShape;
use serde::{Deserialize, Serialize};
use std::{env, fmt, time::Duration};

/// Configuration for the jobs query service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// InfluxDB connection configuration
    pub influx: InfluxConfig,

    /// Shape of the jobs query
    pub query: QueryShape,

    /// Per-request query limits
    pub limits: QueryLimitsConfig,

    /// Metrics and monitoring configuration
    pub metrics: MetricsConfig,
}

/// InfluxDB connection configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server
    pub url: String,

    /// API token sent as `Authorization: Token <token>`
    pub token: String,

    /// Organization name or ID queries run under
    pub org: String,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Query limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimitsConfig {
    /// Abort the query after this many milliseconds. Unset means no deadline
    /// beyond the client's own connection.
    pub query_timeout_ms: Option<u64>,
}

/// Metrics and monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    pub enable_prometheus: bool,

    /// Metrics endpoint path
    pub metrics_path: String,

    /// Queries slower than this are logged and counted
    pub slow_query_threshold_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            influx: InfluxConfig::default(),
            query: QueryShape::default(),
            limits: QueryLimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: String::new(),
            connect_timeout_ms: 5000,
        }
    }
}

impl fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            metrics_path: "/metrics".to_string(),
            slow_query_threshold_ms: 1000, // 1 second
        }
    }
}

impl QueryLimitsConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

impl QueryConfig {
    /// Load configuration from file, environment variables, and defaults
    pub fn load() -> Result<Self> {
        let mut config = match env::var("CONFIG_PATH") {
            Ok(path) => Self::load_from_file(&path)?,
            Err(_) if std::path::Path::new("config/jobs-query.yaml").exists() => {
                Self::load_from_file("config/jobs-query.yaml")?
            }
            Err(_) => Self::default(),
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_addr) = lookup("JOBS_BIND_ADDRESS") {
            self.bind_address = bind_addr;
        }

        if let Some(url) = lookup("INFLUX_URL") {
            self.influx.url = url;
        }

        if let Some(token) = lookup("INFLUX_TOKEN") {
            self.influx.token = token;
        }

        if let Some(org) = lookup("INFLUX_ORG") {
            self.influx.org = org;
        }

        if let Some(bucket) = lookup("JOBS_QUERY_BUCKET") {
            self.query.bucket = bucket;
        }

        if let Some(measurement) = lookup("JOBS_QUERY_MEASUREMENT") {
            self.query.measurement = measurement;
        }

        if let Some(range_hours) = lookup("JOBS_QUERY_RANGE_HOURS") {
            self.query.range_hours = range_hours
                .parse()
                .context("JOBS_QUERY_RANGE_HOURS must be a whole number of hours")?;
        }

        if let Some(limit) = lookup("JOBS_QUERY_LIMIT") {
            self.query.limit = limit.parse().context("JOBS_QUERY_LIMIT must be a number")?;
        }

        if let Some(timeout) = lookup("JOBS_QUERY_TIMEOUT_MS") {
            self.limits.query_timeout_ms = Some(
                timeout
                    .parse()
                    .context("JOBS_QUERY_TIMEOUT_MS must be a number of milliseconds")?,
            );
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.influx.url.is_empty() {
            return Err(anyhow::anyhow!("InfluxDB URL is required"));
        }

        if self.influx.org.is_empty() {
            return Err(anyhow::anyhow!("InfluxDB organization is required"));
        }

        self.query.validate().map_err(|err| anyhow::anyhow!(err))?;

        if self.limits.query_timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("Query timeout must be greater than 0"));
        }

        if self.metrics.enable_prometheus && !self.metrics.metrics_path.starts_with('/') {
            return Err(anyhow::anyhow!("Metrics path must start with '/'"));
        }

        Ok(())
    }
}
