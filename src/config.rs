use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub data_store: DataStoreConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

/// App-owned SQLite database: audit log + query history.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/sql-gateway.db".to_string() }
    }
}

/// External read-only analytic store the validated SQL is executed against.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataStoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9030,
            user: "readonly".to_string(),
            password: String::new(),
            database: "analytics".to_string(),
        }
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
        Self { level: "info,sql_gateway=debug".to_string(), file: Some("logs/sql-gateway.log".to_string()) }
    }
}

/// LLM provider selection, timeout and confidence gate (spec.md §4.3/§4.4/§6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "mock" | "openai" | "openrouter" | "anthropic"
    pub provider: String,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_seconds: u64,
    pub confidence_threshold: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 30,
            confidence_threshold: 0.7,
        }
    }
}

/// Sliding-window admission control (spec.md §4.6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 100, window_seconds: 60 }
    }
}

/// Circuit breaker around the LLM call (spec.md §4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub window_seconds: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub recovery_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, window_seconds: 60, recovery_seconds: 30 }
    }
}

/// Short-term plan cache (spec.md §4.7).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub ttl_seconds: u64,
    pub max_value_bytes: usize,
    /// redis://... ; empty means in-process only
    pub redis_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 1800, max_value_bytes: 1_048_576, redis_url: String::new() }
    }
}

/// Long-retention query history store (spec.md §4.8).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    #[serde(deserialize_with = "deserialize_days_i64")]
    pub retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

/// SQL safety validator knobs (spec.md §4.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub default_limit: u32,
    pub allowlisted_tables: Vec<String>,
    pub blocked_keywords: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            default_limit: 200,
            allowlisted_tables: vec![
                "sales_fact".to_string(),
                "job_runs".to_string(),
                "audit_log".to_string(),
            ],
            blocked_keywords: vec![
                "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "GRANT",
                "REVOKE", "COPY",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "sql-gateway")]
#[command(version, about = "Safe LLM-to-SQL gateway")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// App database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,sql_gateway=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// LLM provider ("mock" | "openai" | "openrouter" | "anthropic")
    #[arg(long, value_name = "PROVIDER")]
    pub llm_provider: Option<String>,

    /// LLM API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_URL
    /// - APP_LOG_LEVEL
    /// - APP_LLM_PROVIDER / APP_LLM_API_KEY / APP_LLM_API_BASE / APP_LLM_MODEL
    /// - APP_RATE_LIMIT_MAX_REQUESTS / APP_RATE_LIMIT_WINDOW_SECONDS
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(db_url) = std::env::var("APP_DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(provider) = std::env::var("APP_LLM_PROVIDER") {
            self.llm.provider = provider;
            tracing::info!("Override llm.provider from env: {}", self.llm.provider);
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = key;
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env");
        }

        if let Ok(model) = std::env::var("APP_LLM_MODEL") {
            self.llm.model = model;
            tracing::info!("Override llm.model from env: {}", self.llm.model);
        }

        if let Ok(max) = std::env::var("APP_RATE_LIMIT_MAX_REQUESTS")
            && let Ok(val) = max.parse()
        {
            self.rate_limit.max_requests = val;
            tracing::info!("Override rate_limit.max_requests from env: {}", val);
        }

        if let Ok(window) = std::env::var("APP_RATE_LIMIT_WINDOW_SECONDS") {
            match parse_duration_to_secs(&window) {
                Ok(val) => {
                    self.rate_limit.window_seconds = val;
                    tracing::info!("Override rate_limit.window_seconds from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_RATE_LIMIT_WINDOW_SECONDS '{}': {} (keep {})",
                    window,
                    e,
                    self.rate_limit.window_seconds
                ),
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
            tracing::info!("Override database.url from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(provider) = &args.llm_provider {
            self.llm.provider = provider.clone();
            tracing::info!("Override llm.provider from CLI: {}", self.llm.provider);
        }

        if let Some(key) = &args.llm_api_key {
            self.llm.api_key = key.clone();
            tracing::info!("Override llm.api_key from CLI");
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.validator.allowlisted_tables.is_empty() {
            anyhow::bail!("validator.allowlisted_tables cannot be empty");
        }

        if !(0.0..=1.0).contains(&self.llm.confidence_threshold) {
            anyhow::bail!("llm.confidence_threshold must be within [0.0, 1.0]");
        }

        if self.llm.provider != "mock" && self.llm.api_key.is_empty() {
            tracing::warn!(
                "⚠️  llm.provider={} has no api_key configured; calls will fail",
                self.llm.provider
            );
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn parse_days_to_i64(input: &str) -> Result<i64, String> {
    if let Ok(val) = input.parse::<i64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: i64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "d" | "day" | "days" => Ok(n),
        "w" | "week" | "weeks" => Ok(n * 7),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

fn deserialize_days_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = i64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of days or a string like '7d' or '2w'")
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v as i64)
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_days_to_i64(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
