use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Retry and fx tunables for the dispatch engine.
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
    /// Platform exchange rate applied when an order's economics are frozen.
    #[serde(default = "default_fx_rate")]
    pub fx_rate: f64,
    #[serde(default = "default_pump_interval")]
    pub pump_interval_seconds: u64,
    #[serde(default = "default_pump_batch")]
    pub pump_batch_size: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,
}

fn default_max_attempts() -> i32 {
    5
}
fn default_base_delay() -> u64 {
    30
}
fn default_max_delay() -> u64 {
    900
}
fn default_fx_rate() -> f64 {
    1.0
}
fn default_pump_interval() -> u64 {
    15
}
fn default_pump_batch() -> i64 {
    50
}
fn default_sync_interval() -> u64 {
    300
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file (optional)
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file, not checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of VENDRA)
            // Eg. `VENDRA__SERVER__PORT=9000` would set the server port
            .add_source(config::Environment::with_prefix("VENDRA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
