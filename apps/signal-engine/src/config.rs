//! Configuration loading and validation.
//!
//! Settings come from an optional YAML file with per-field defaults; the
//! binary applies environment overrides on top. Every section has a
//! serde `default` so a partial file (or none at all) yields the reference
//! configuration.
//!
//! ```yaml
//! server:
//!   http_port: 8080
//!   allowed_origins: ["https://alerts.example.com"]
//! trading:
//!   accounts: ["U1234567", "U7654321"]
//!   contract:
//!     symbol: TQQQ
//! signals:
//!   open_alert_id: "..."
//!   liquidate_alert_id: "..."
//! ```

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AccountId, Contract, SecurityType};
use crate::session::ReconnectPolicy;
use crate::workflow::EngineSettings;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse the YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Gateway session configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Trading configuration.
    #[serde(default)]
    pub trading: TradingConfig,
    /// Signal gate configuration.
    #[serde(default)]
    pub signals: SignalConfig,
}

impl Config {
    /// Validate cross-field invariants at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] when accounts are missing
    /// or numeric parameters cannot drive the workflows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.accounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "trading.accounts must list at least one account".to_string(),
            ));
        }
        if self.trading.leverage_factor <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "trading.leverage_factor must be positive".to_string(),
            ));
        }
        if self.trading.default_price <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "trading.default_price must be positive".to_string(),
            ));
        }
        if self.gateway.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.gateway.reconnect_base_ms == 0
            || self.gateway.reconnect_max_ms < self.gateway.reconnect_base_ms
        {
            return Err(ConfigError::ValidationError(
                "gateway reconnect delays must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.signals.cooldown_ms == 0 {
            return Err(ConfigError::ValidationError(
                "signals.cooldown_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the webhook receiver listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// CORS origin allow-list. Empty means no cross-origin access.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            allowed_origins: Vec::new(),
        }
    }
}

const fn default_http_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Which gateway client implementation the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    /// In-process paper gateway.
    #[default]
    Sim,
}

/// Gateway session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Client implementation to use.
    #[serde(default)]
    pub mode: GatewayMode,
    /// Timeout for each correlated request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Base reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::Sim,
            request_timeout_secs: default_request_timeout_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl GatewayConfig {
    /// Correlated-request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reconnect backoff policy from the configured delays.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_reconnect_base_ms() -> u64 {
    5000
}

const fn default_reconnect_max_ms() -> u64 {
    120_000
}

/// Contract configuration for the traded instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Ticker symbol.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Security type.
    #[serde(default = "default_sec_type")]
    pub sec_type: SecurityType,
    /// Routing exchange.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Primary listing exchange.
    #[serde(default = "default_primary_exchange")]
    pub primary_exchange: String,
    /// Trading currency.
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            sec_type: default_sec_type(),
            exchange: default_exchange(),
            primary_exchange: default_primary_exchange(),
            currency: default_currency(),
        }
    }
}

impl ContractConfig {
    /// Build the domain contract.
    #[must_use]
    pub fn to_contract(&self) -> Contract {
        Contract {
            symbol: self.symbol.clone(),
            sec_type: self.sec_type,
            exchange: self.exchange.clone(),
            primary_exchange: self.primary_exchange.clone(),
            currency: self.currency.clone(),
        }
    }
}

fn default_symbol() -> String {
    "TQQQ".to_string()
}

const fn default_sec_type() -> SecurityType {
    SecurityType::Stock
}

fn default_exchange() -> String {
    "SMART".to_string()
}

fn default_primary_exchange() -> String {
    "NASDAQ".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Trading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// The one instrument all orders reference.
    #[serde(default)]
    pub contract: ContractConfig,
    /// Accounts every workflow iterates.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Fraction of cash value deployed per entry.
    #[serde(default = "default_leverage_factor")]
    pub leverage_factor: Decimal,
    /// Staleness window for cached account data, in seconds.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Fill-confirmation window for the one-shot fill logger, in seconds.
    #[serde(default = "default_fill_confirm_secs")]
    pub fill_confirm_secs: u64,
    /// Reference price before any signal has carried one.
    #[serde(default = "default_price")]
    pub default_price: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            contract: ContractConfig::default(),
            accounts: Vec::new(),
            leverage_factor: default_leverage_factor(),
            staleness_secs: default_staleness_secs(),
            fill_confirm_secs: default_fill_confirm_secs(),
            default_price: default_price(),
        }
    }
}

impl TradingConfig {
    /// Typed account ids.
    #[must_use]
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(AccountId::new).collect()
    }

    /// Engine settings derived from this section.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            contract: self.contract.to_contract(),
            accounts: self.account_ids(),
            leverage_factor: self.leverage_factor,
            staleness_window: Duration::from_secs(self.staleness_secs),
            fill_confirm_timeout: Duration::from_secs(self.fill_confirm_secs),
        }
    }
}

fn default_leverage_factor() -> Decimal {
    dec!(1.25)
}

const fn default_staleness_secs() -> u64 {
    60
}

const fn default_fill_confirm_secs() -> u64 {
    300
}

fn default_price() -> Decimal {
    dec!(66)
}

/// Signal gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Lock cool-down in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Alert id that forces an open-position pass.
    #[serde(default)]
    pub open_alert_id: Option<String>,
    /// Alert id that forces a full liquidation.
    #[serde(default)]
    pub liquidate_alert_id: Option<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            open_alert_id: None,
            liquidate_alert_id: None,
        }
    }
}

impl SignalConfig {
    /// Cool-down as a duration.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

const fn default_cooldown_ms() -> u64 {
    4000
}

/// Load configuration from a YAML file.
///
/// With an explicit `path`, a missing file is an error. With `None`, the
/// default `config.yaml` is used if present, otherwise defaults apply.
///
/// # Errors
///
/// Fails when the file cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => ("config.yaml", false),
    };

    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_yaml_bw::from_str(&content)?),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound && !required => {
            Ok(Config::default())
        }
        Err(source) => Err(ConfigError::ReadError {
            path: path.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            trading: TradingConfig {
                accounts: vec!["U1".to_string()],
                ..TradingConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_reference_behavior() {
        let config = Config::default();
        assert_eq!(config.gateway.reconnect_base_ms, 5000);
        assert_eq!(config.gateway.reconnect_max_ms, 120_000);
        assert_eq!(config.signals.cooldown_ms, 4000);
        assert_eq!(config.trading.leverage_factor, dec!(1.25));
        assert_eq!(config.trading.staleness_secs, 60);
        assert_eq!(config.trading.default_price, dec!(66));
        assert_eq!(config.trading.contract.symbol, "TQQQ");
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml_bw::from_str(
            r"
trading:
  accounts: [U1, U2]
signals:
  open_alert_id: abc
",
        )
        .unwrap();

        assert_eq!(config.trading.accounts, vec!["U1", "U2"]);
        assert_eq!(config.signals.open_alert_id.as_deref(), Some("abc"));
        assert!(config.signals.liquidate_alert_id.is_none());
        assert_eq!(config.server.http_port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_requires_accounts() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_cooldown() {
        let mut config = valid_config();
        config.signals.cooldown_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_reconnect_delays() {
        let mut config = valid_config();
        config.gateway.reconnect_base_ms = 10_000;
        config.gateway.reconnect_max_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn engine_settings_carry_trading_section() {
        let settings = valid_config().trading.engine_settings();
        assert_eq!(settings.accounts.len(), 1);
        assert_eq!(settings.contract.symbol, "TQQQ");
        assert_eq!(settings.staleness_window, Duration::from_secs(60));
    }

    #[test]
    fn missing_default_file_falls_back_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.server.http_port, 8080);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(matches!(
            load_config(Some("/nonexistent/config.yaml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
