//! Configuration loading and validation.

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Countries the engine may discover markets in.
pub const ALLOWED_COUNTRIES: &[&str] = &["GB", "IE", "ZA", "FR"];

/// Enumerated point values an operator may select.
pub const ALLOWED_POINT_VALUES: &[Decimal] =
    &[dec!(1), dec!(2), dec!(5), dec!(10), dec!(20), dec!(50)];

/// Processing window bounds (minutes before the off).
pub const WINDOW_MIN_MINUTES: u32 = 1;
pub const WINDOW_MAX_MINUTES: u32 = 60;

/// Top-level configuration, loaded once at process start from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path, e))?;
        let config: Config = toml::from_str(&raw)?;
        config.engine.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }
}

/// Exchange credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub app_key: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_keepalive_url")]
    pub keepalive_url: String,
    #[serde(default = "default_account_url")]
    pub account_url: String,
}

fn default_api_url() -> String {
    "https://api.betfair.com/exchange/betting/json-rpc/v1".to_string()
}

fn default_auth_url() -> String {
    "https://identitysso.betfair.com/api/login".to_string()
}

fn default_keepalive_url() -> String {
    "https://identitysso.betfair.com/api/keepAlive".to_string()
}

fn default_account_url() -> String {
    "https://api.betfair.com/exchange/account/json-rpc/v1".to_string()
}

/// Scheduler-wide settings. Hot-swappable through the control surface;
/// every mutation revalidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_process_window")]
    pub process_window_minutes: u32,
    #[serde(default = "default_countries")]
    pub countries: Vec<String>,
    #[serde(default = "default_point_value")]
    pub point_value: Decimal,
    #[serde(default)]
    pub spread_control_enabled: bool,
    #[serde(default)]
    pub jofs_enabled: bool,
    #[serde(default = "default_min_odds")]
    pub min_odds: Decimal,
    #[serde(default = "default_max_lay_odds")]
    pub max_lay_odds: Decimal,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

fn default_process_window() -> u32 {
    12
}

fn default_countries() -> Vec<String> {
    vec!["GB".to_string(), "IE".to_string()]
}

fn default_point_value() -> Decimal {
    dec!(1)
}

fn default_min_odds() -> Decimal {
    dec!(2.0)
}

fn default_max_lay_odds() -> Decimal {
    dec!(50.0)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            poll_interval_secs: default_poll_interval(),
            process_window_minutes: default_process_window(),
            countries: default_countries(),
            point_value: default_point_value(),
            spread_control_enabled: false,
            jofs_enabled: false,
            min_odds: default_min_odds(),
            max_lay_odds: default_max_lay_odds(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        validate_window(self.process_window_minutes)?;
        validate_point_value(self.point_value)?;
        validate_countries(&self.countries)?;
        if self.min_odds <= Decimal::ONE {
            return Err(EngineError::Config(format!(
                "min_odds {} must exceed 1.0",
                self.min_odds
            )));
        }
        if self.max_lay_odds <= self.min_odds {
            return Err(EngineError::Config(format!(
                "max_lay_odds {} must exceed min_odds {}",
                self.max_lay_odds, self.min_odds
            )));
        }
        Ok(())
    }
}

pub fn validate_window(minutes: u32) -> Result<()> {
    if !(WINDOW_MIN_MINUTES..=WINDOW_MAX_MINUTES).contains(&minutes) {
        return Err(EngineError::Control("out_of_range".to_string()));
    }
    Ok(())
}

pub fn validate_point_value(value: Decimal) -> Result<()> {
    if !ALLOWED_POINT_VALUES.contains(&value) {
        return Err(EngineError::Control("invalid_value".to_string()));
    }
    Ok(())
}

pub fn validate_countries(countries: &[String]) -> Result<()> {
    sanitize_countries(countries).map(|_| ())
}

/// Uppercase and filter a requested country set down to the allowed list.
/// Errors when nothing valid remains.
pub fn sanitize_countries(countries: &[String]) -> Result<Vec<String>> {
    let filtered: Vec<String> = countries
        .iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| ALLOWED_COUNTRIES.contains(&c.as_str()))
        .collect();
    if filtered.is_empty() {
        return Err(EngineError::Control("empty_set".to_string()));
    }
    Ok(filtered)
}

/// Persistence targets: hot local file, optional durable blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    /// Base URL of the object store holding the durable copy; disabled
    /// when absent.
    #[serde(default)]
    pub blob_base_url: Option<String>,
    #[serde(default)]
    pub blob_auth_token: Option<String>,
}

fn default_state_path() -> String {
    "data/engine_state.json".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            blob_base_url: None,
            blob_auth_token: None,
        }
    }
}

/// Control-surface HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}
