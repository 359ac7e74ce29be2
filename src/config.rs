use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_local_path")]
    pub local_path: String,
}

/// External ledger collaborator (anchor store)
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ledger_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_ledger_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_ledger_timeout_secs")]
    pub timeout_secs: u64,
}

/// External signature-recovery collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

/// Creation-time bounds, validated once per record.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_view_limit")]
    pub max_view_limit: i64,
    #[serde(default = "default_min_expiry_hours")]
    pub min_expiry_hours: i64,
    #[serde(default = "default_max_expiry_hours")]
    pub max_expiry_hours: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1421
}

fn default_db_path() -> String {
    "data/anchorbox.db".to_string()
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_ledger_endpoint() -> String {
    "http://127.0.0.1:8790".to_string()
}

fn default_ledger_max_retries() -> u32 {
    3
}

fn default_ledger_base_delay_ms() -> u64 {
    500
}

fn default_ledger_timeout_secs() -> u64 {
    15
}

fn default_recovery_endpoint() -> String {
    "http://127.0.0.1:8791".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_view_limit() -> i64 {
    100
}

fn default_min_expiry_hours() -> i64 {
    1
}

fn default_max_expiry_hours() -> i64 {
    720 // 30 days
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ledger_endpoint(),
            max_retries: default_ledger_max_retries(),
            base_delay_ms: default_ledger_base_delay_ms(),
            timeout_secs: default_ledger_timeout_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_recovery_endpoint(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_view_limit: default_max_view_limit(),
            min_expiry_hours: default_min_expiry_hours(),
            max_expiry_hours: default_max_expiry_hours(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            ledger: LedgerConfig::default(),
            recovery: RecoveryConfig::default(),
            sweep: SweepConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from conf.ini or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.ini", "config.toml", "data/conf.ini", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: AB_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("AB_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("AB_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("AB_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Storage overrides
        if let Ok(val) = env::var("AB_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }

        // Ledger overrides
        if let Ok(val) = env::var("AB_CONF_LEDGER_ENDPOINT") {
            self.ledger.endpoint = val;
        }
        if let Ok(val) = env::var("AB_CONF_LEDGER_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                self.ledger.max_retries = n;
            }
        }
        if let Ok(val) = env::var("AB_CONF_LEDGER_BASE_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                self.ledger.base_delay_ms = ms;
            }
        }
        if let Ok(val) = env::var("AB_CONF_LEDGER_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.ledger.timeout_secs = secs;
            }
        }

        // Recovery overrides
        if let Ok(val) = env::var("AB_CONF_RECOVERY_ENDPOINT") {
            self.recovery.endpoint = val;
        }

        // Sweep overrides
        if let Ok(val) = env::var("AB_CONF_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.sweep.interval_secs = secs;
            }
        }

        // Limits overrides
        if let Ok(val) = env::var("AB_CONF_LIMITS_MAX_VIEW_LIMIT") {
            if let Ok(n) = val.parse() {
                self.limits.max_view_limit = n;
            }
        }
        if let Ok(val) = env::var("AB_CONF_LIMITS_MIN_EXPIRY_HOURS") {
            if let Ok(n) = val.parse() {
                self.limits.min_expiry_hours = n;
            }
        }
        if let Ok(val) = env::var("AB_CONF_LIMITS_MAX_EXPIRY_HOURS") {
            if let Ok(n) = val.parse() {
                self.limits.max_expiry_hours = n;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        // Ensure database directory exists
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        // Ensure blob storage directory exists
        fs::create_dir_all(&self.storage.local_path)?;

        Ok(())
    }
}
