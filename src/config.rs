use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Tolerances used by the invoice matching engine. These are configuration
/// defaults, not business law; quantity matching is always exact.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct MatchingConfig {
    /// Allowed deviation (percent) between invoice total and best-quotation total
    #[serde(default = "default_quotation_tolerance")]
    pub quotation_tolerance_pct: Decimal,

    /// Allowed deviation (percent) between an invoice line rate and the PO line rate
    #[serde(default = "default_rate_tolerance")]
    pub rate_tolerance_pct: Decimal,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            quotation_tolerance_pct: default_quotation_tolerance(),
            rate_tolerance_pct: default_rate_tolerance(),
        }
    }
}

/// Cascade orchestrator knobs.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CascadeConfig {
    /// Purchase requisitions whose estimated value reaches this amount are
    /// routed through the approval engine instead of staying in draft.
    #[serde(default = "default_pr_approval_threshold")]
    pub pr_approval_threshold: Decimal,

    /// Warehouse used for finished-goods availability checks.
    #[serde(default = "default_warehouse")]
    pub finished_goods_warehouse: String,

    /// Warehouse used for raw-material availability checks.
    #[serde(default = "default_warehouse")]
    pub raw_material_warehouse: String,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            pr_approval_threshold: default_pr_approval_threshold(),
            finished_goods_warehouse: default_warehouse(),
            raw_material_warehouse: default_warehouse(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub cascade: CascadeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            matching: MatchingConfig::default(),
            cascade: CascadeConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_quotation_tolerance() -> Decimal {
    dec!(1.0)
}

fn default_rate_tolerance() -> Decimal {
    dec!(2.0)
}

fn default_pr_approval_threshold() -> Decimal {
    dec!(100000)
}

fn default_warehouse() -> String {
    "MAIN".to_string()
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

/// Loads configuration from `config/default.toml`, an optional
/// environment-specific overlay, and `FABRIQ_*` environment variables.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("FABRIQ_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.into());

    let mut builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(&environment)).required(false))
        .add_source(Environment::with_prefix("FABRIQ").separator("__"));

    // Plain DATABASE_URL wins over files for container deployments
    if let Ok(url) = std::env::var("DATABASE_URL") {
        builder = builder.set_override("database_url", url)?;
    }

    let config: AppConfig = builder.build()?.try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %config.environment,
        port = config.port,
        "configuration loaded"
    );

    Ok(config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_four_way_matching_conventions() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.matching.quotation_tolerance_pct, dec!(1.0));
        assert_eq!(cfg.matching.rate_tolerance_pct, dec!(2.0));
        assert_eq!(cfg.cascade.pr_approval_threshold, dec!(100000));
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let cfg = AppConfig {
            host: "127.0.0.1".into(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
    }
}
