use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub render: RenderConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Stores searched at the same time, shared by fetch and render stores.
    pub concurrency: usize,
    /// Hard per-store deadline, independent of any HTTP or browser timeout.
    pub adapter_timeout_secs: u64,
    pub max_results_per_store: usize,
    pub min_query_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub check_period_secs: u64,
    pub max_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub launch_timeout_secs: u64,
    pub default_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub user_agent: String,
    pub accept_language: String,
    pub blocked_url_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            adapter_timeout_secs: 35,
            max_results_per_store: 20,
            min_query_chars: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            check_period_secs: 120,
            max_entries: 10_000,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            launch_timeout_secs: 30,
            default_timeout_secs: 45,
            idle_timeout_secs: 3600,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
            accept_language: "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            blocked_url_patterns: [
                // fonts and media
                "*.woff", "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3",
                // trackers
                "*google-analytics*", "*googletagmanager*", "*facebook.net*",
                "*hotjar*", "*doubleclick*", "*adservice.google*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/database.db".to_string(),
            max_connections: 5,
            retention_days: 30,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl SearchConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_period_secs)
    }
}

impl RenderConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "BUSCA_"
            .add_source(Environment::with_prefix("BUSCA").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.render.chrome_path.is_none() {
            config.render.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port must be greater than 0".into()));
        }

        if self.search.concurrency == 0 {
            return Err(ConfigError::Message("Search concurrency must be greater than 0".into()));
        }

        if self.search.adapter_timeout_secs == 0 {
            return Err(ConfigError::Message("Search adapter_timeout_secs must be greater than 0".into()));
        }

        if self.search.max_results_per_store == 0 {
            return Err(ConfigError::Message("Search max_results_per_store must be greater than 0".into()));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Message("Cache ttl_secs must be greater than 0".into()));
        }

        if self.cache.check_period_secs == 0 {
            return Err(ConfigError::Message("Cache check_period_secs must be greater than 0".into()));
        }

        if self.render.launch_timeout_secs == 0 {
            return Err(ConfigError::Message("Render launch_timeout_secs must be greater than 0".into()));
        }

        if self.render.user_agent.trim().is_empty() {
            return Err(ConfigError::Message("Render user_agent must not be empty".into()));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigError::Message("Database url must be a sqlite: URL".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}
