//! Configuration - Type-safe, validated config
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::TradingPair;
use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub engine: EngineConfig,
    pub risk: RiskPolicy,
    /// Listed trading pairs
    pub pairs: Vec<TradingPair>,
    pub sweeps: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "spot-core".to_string(),
            log_filter: "info,spot_core=debug".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra quote reserved for market buys on top of the reference notional
    pub market_slippage: Decimal,
    /// Levels returned by a depth query when the caller does not say
    pub depth_levels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            market_slippage: Decimal::new(5, 2),
            depth_levels: 10,
        }
    }
}

/// Risk thresholds. Nothing in the risk engine is hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Max order notional in quote units
    pub max_position_size: Decimal,
    /// Max unrealized loss magnitude before new orders are refused
    pub max_daily_loss: Decimal,
    /// Max drawdown fraction reported as a breach
    pub max_drawdown: Decimal,
    /// Minimum margin level for margin-enabled accounts
    pub min_margin_level: Decimal,
    /// Max order notional as a fraction of account balance
    pub max_concentration: Decimal,
    pub margin_call_level: Decimal,
    pub liquidation_level: Decimal,
    /// Initial margin as a fraction of position notional
    pub initial_margin_rate: Decimal,
    pub maintenance_margin_rate: Decimal,
    /// Per-asset daily volatility used for VaR
    pub asset_volatility: Decimal,
    /// Account volatility used for Sharpe
    pub account_volatility: Decimal,
    pub max_kelly_fraction: Decimal,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(1_000_000),
            max_daily_loss: Decimal::from(100_000),
            max_drawdown: Decimal::from(20) / Decimal::from(100),
            min_margin_level: Decimal::from(10) / Decimal::from(100),
            max_concentration: Decimal::from(30) / Decimal::from(100),
            margin_call_level: Decimal::from(130) / Decimal::from(100),
            liquidation_level: Decimal::from(110) / Decimal::from(100),
            initial_margin_rate: Decimal::from(10) / Decimal::from(100),
            maintenance_margin_rate: Decimal::from(5) / Decimal::from(100),
            asset_volatility: Decimal::from(2) / Decimal::from(100),
            account_volatility: Decimal::from(15) / Decimal::from(100),
            max_kelly_fraction: Decimal::from(25) / Decimal::from(100),
        }
    }
}

impl RiskPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.liquidation_level > self.margin_call_level {
            return Err(Error::Config(format!(
                "liquidation level {} above margin call level {}",
                self.liquidation_level, self.margin_call_level
            )));
        }
        if self.max_kelly_fraction < Decimal::ZERO || self.max_kelly_fraction > Decimal::ONE {
            return Err(Error::Config(format!(
                "max kelly fraction {} outside [0, 1]",
                self.max_kelly_fraction
            )));
        }
        if self.max_concentration <= Decimal::ZERO {
            return Err(Error::Config("max concentration must be positive".into()));
        }
        Ok(())
    }
}

/// Background sweep intervals in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub expiry_ms: u64,
    pub stop_trigger_ms: u64,
    pub margin_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 1_000,
            stop_trigger_ms: 250,
            margin_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.risk.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to built-in defaults.
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("📋 Loaded config from {}", path);
                    return cfg;
                }
                Err(e) => tracing::debug!("config candidate {} skipped: {}", path, e),
            }
        }

        tracing::warn!("⚠️ No config.toml found, using built-in defaults");
        Self::default()
    }
}
