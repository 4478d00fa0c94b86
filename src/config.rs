//! Configuration types for poly-converge
//!
//! The configuration is loaded once at startup and passed down explicitly;
//! nothing in the crate reads it from a global.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A parameter is outside its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    /// A credential required for live trading is missing
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(&'static str),
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    pub telemetry: TelemetryConfig,
}

/// Entry and exit rules for the convergence heuristic
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Lowest side price that qualifies for entry (inclusive)
    #[serde(default = "default_min_price")]
    pub min_price: Decimal,
    /// Highest side price that qualifies for entry (inclusive)
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    /// Minimum days to resolution (inclusive, fractional)
    #[serde(default)]
    pub min_days: Decimal,
    /// Maximum days to resolution (inclusive, fractional)
    #[serde(default = "default_max_days")]
    pub max_days: Decimal,
    /// Exit once the held side trades at or above this price
    #[serde(default = "default_target_price")]
    pub target_price: Decimal,
    /// Exit once the held side trades at or below this price
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Ignore the target and wait for resolution
    #[serde(default)]
    pub hold_to_resolution: bool,
    /// Also consider the NO side with the mirrored band
    #[serde(default = "default_true")]
    pub allow_no_side: bool,
}

fn default_min_price() -> Decimal {
    dec!(0.60)
}
fn default_max_price() -> Decimal {
    dec!(0.80)
}
fn default_max_days() -> Decimal {
    dec!(7)
}
fn default_target_price() -> Decimal {
    dec!(0.95)
}
fn default_true() -> bool {
    true
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            min_days: Decimal::ZERO,
            max_days: default_max_days(),
            target_price: default_target_price(),
            stop_loss: None,
            hold_to_resolution: false,
            allow_no_side: true,
        }
    }
}

/// Position sizing and exposure limits
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Fixed USD size per entry
    #[serde(default = "default_position_size")]
    pub position_size_usd: Decimal,
    /// Maximum concurrent open positions
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Ceiling on positions value plus open-order notional
    #[serde(default = "default_max_exposure")]
    pub max_exposure_usd: Decimal,
    /// Smallest order the venue accepts
    #[serde(default = "default_min_order")]
    pub min_order_usd: Decimal,
}

fn default_position_size() -> Decimal {
    dec!(10)
}
fn default_max_positions() -> usize {
    5
}
fn default_max_exposure() -> Decimal {
    dec!(50)
}
fn default_min_order() -> Decimal {
    dec!(1)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            position_size_usd: default_position_size(),
            max_positions: default_max_positions(),
            max_exposure_usd: default_max_exposure(),
            min_order_usd: default_min_order(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Width of the time bucket folded into derived idempotency keys
    #[serde(default = "default_bucket_secs")]
    pub idempotency_bucket_secs: u64,
}

fn default_bucket_secs() -> u64 {
    60
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            idempotency_bucket_secs: default_bucket_secs(),
        }
    }
}

/// Execution mode
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run every safety check, never submit
    #[default]
    DryRun,
    /// Submit to the simulated venue
    Paper,
    /// Submit real orders
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::DryRun => write!(f, "dry-run"),
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

/// Account state synchronization
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum cache age trusted without a refresh
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Positions smaller than this many shares are treated as dust
    #[serde(default = "default_min_position_size")]
    pub min_position_size: Decimal,
}

fn default_staleness_secs() -> u64 {
    30
}
fn default_min_position_size() -> Decimal {
    dec!(0.01)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            min_position_size: default_min_position_size(),
        }
    }
}

impl SyncConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

/// Upper bound for `reconcile.grace_period_secs`
pub const MAX_GRACE_PERIOD_SECS: u64 = 86_400;

/// Reconciliation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Trades younger than this are not checked against the venue yet
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_grace_period_secs() -> u64 {
    120
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

/// Cycle scheduling
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Number of recent cycle errors kept for status output
    #[serde(default = "default_error_buffer")]
    pub error_buffer_size: usize,
}

fn default_scan_interval() -> u64 {
    300
}
fn default_check_interval() -> u64 {
    60
}
fn default_error_buffer() -> usize {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            check_interval_secs: default_check_interval(),
            error_buffer_size: default_error_buffer(),
        }
    }
}

/// Ledger store location
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// SQLite URL, e.g. `sqlite://poly-converge.db` or `sqlite::memory:`
    pub url: String,
}

/// Market data sources
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    /// Secondary Gamma endpoint tried when the primary is unavailable
    #[serde(default)]
    pub fallback_gamma_url: Option<String>,
    /// Maximum markets fetched per scan
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}
fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_fetch_limit() -> usize {
    500
}
fn default_timeout_secs() -> u64 {
    10
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            gamma_url: default_gamma_url(),
            clob_url: default_clob_url(),
            fallback_gamma_url: None,
            fetch_limit: default_fetch_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Venue endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    /// Polygon JSON-RPC endpoint used for the on-chain balance reading
    #[serde(default)]
    pub polygon_rpc_url: Option<String>,
    #[serde(default = "default_usdc_contract")]
    pub usdc_contract: String,
    /// Signing sidecar that turns order requests into signed CLOB orders
    #[serde(default)]
    pub signer_url: Option<String>,
    /// Starting balance of the simulated venue
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

fn default_data_api_url() -> String {
    "https://data-api.polymarket.com".to_string()
}
fn default_usdc_contract() -> String {
    "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string()
}
fn default_paper_balance() -> Decimal {
    dec!(100)
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            clob_url: default_clob_url(),
            data_api_url: default_data_api_url(),
            polygon_rpc_url: None,
            usdc_contract: default_usdc_contract(),
            signer_url: None,
            paper_balance: default_paper_balance(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus listener port; no exporter when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
    pub log_level: String,
    #[serde(default)]
    pub log_format: crate::telemetry::LogFormat,
}

/// API credentials for the live venue, read from the environment
#[derive(Clone)]
pub struct Credentials {
    /// Funder / proxy wallet address
    pub address: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials from `POLY_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        fn var(name: &'static str) -> Result<String, ConfigError> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        }

        Ok(Self {
            address: var("POLY_ADDRESS")?,
            api_key: var("POLY_API_KEY")?,
            api_secret: var("POLY_API_SECRET")?,
            passphrase: var("POLY_PASSPHRASE")?,
        })
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the bot cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        let unit = |v: Decimal| v > Decimal::ZERO && v < Decimal::ONE;

        if !unit(s.min_price) || !unit(s.max_price) {
            return Err(invalid("strategy price band must lie strictly between 0 and 1"));
        }
        if s.min_price > s.max_price {
            return Err(invalid("strategy.min_price must not exceed strategy.max_price"));
        }
        if s.min_days < Decimal::ZERO || s.min_days > s.max_days {
            return Err(invalid("strategy day range must satisfy 0 <= min_days <= max_days"));
        }
        if s.target_price <= Decimal::ZERO || s.target_price > Decimal::ONE {
            return Err(invalid("strategy.target_price must be in (0, 1]"));
        }
        if let Some(stop) = s.stop_loss {
            if !unit(stop) {
                return Err(invalid("strategy.stop_loss must lie strictly between 0 and 1"));
            }
            if stop >= s.min_price {
                return Err(invalid("strategy.stop_loss must be below strategy.min_price"));
            }
        }

        let r = &self.risk;
        if r.position_size_usd <= Decimal::ZERO {
            return Err(invalid("risk.position_size_usd must be positive"));
        }
        if r.max_exposure_usd <= Decimal::ZERO {
            return Err(invalid("risk.max_exposure_usd must be positive"));
        }
        if r.max_positions == 0 {
            return Err(invalid("risk.max_positions must be at least 1"));
        }
        if r.min_order_usd < Decimal::ZERO {
            return Err(invalid("risk.min_order_usd must not be negative"));
        }

        if self.execution.idempotency_bucket_secs == 0 {
            return Err(invalid("execution.idempotency_bucket_secs must be positive"));
        }
        if self.reconcile.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            return Err(invalid("reconcile.grace_period_secs must not exceed one day"));
        }
        if self.sync.staleness_secs == 0 {
            return Err(invalid("sync.staleness_secs must be positive"));
        }
        if self.scheduler.scan_interval_secs == 0 || self.scheduler.check_interval_secs == 0 {
            return Err(invalid("scheduler intervals must be positive"));
        }
        if self.scheduler.error_buffer_size == 0 {
            return Err(invalid("scheduler.error_buffer_size must be at least 1"));
        }
        if self.execution.mode == ExecutionMode::Live && self.venue.signer_url.is_none() {
            return Err(invalid("live mode requires venue.signer_url"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
