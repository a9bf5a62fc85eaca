//! Configuration - Network and market parameters for the liquidity engine
//!
//! Loaded from TOML. Decimal values are written as strings (`max_fee = "1"`)
//! so no parameter ever passes through floating point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Error, Result};
use crate::core::types::Timestamp;

/// Market-level SLA parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaParams {
    /// Half-width of the valid price band around the reference price
    #[serde(default = "default_price_range")]
    pub price_range: Decimal,
    /// Fraction of the epoch an LP must meet its commitment to avoid a full penalty
    #[serde(default = "default_min_time_fraction")]
    pub commitment_min_time_fraction: Decimal,
    #[serde(default = "default_competition_factor")]
    pub sla_competition_factor: Decimal,
    /// Number of trailing epochs averaged into the fee penalty
    #[serde(default = "default_hysteresis_epochs")]
    pub performance_hysteresis_epochs: u64,
}

fn default_price_range() -> Decimal {
    Decimal::new(5, 2)
}
fn default_min_time_fraction() -> Decimal {
    Decimal::new(5, 1)
}
fn default_competition_factor() -> Decimal {
    Decimal::ONE
}
fn default_hysteresis_epochs() -> u64 {
    4
}

impl SlaParams {
    pub fn validate(&self) -> Result<()> {
        unit_fraction("sla.price_range", self.price_range)?;
        unit_fraction("sla.commitment_min_time_fraction", self.commitment_min_time_fraction)?;
        unit_fraction("sla.sla_competition_factor", self.sla_competition_factor)
    }
}

fn unit_fraction(name: &str, v: Decimal) -> Result<()> {
    if v.is_sign_negative() || v > Decimal::ONE {
        return Err(Error::Config(format!("{name} must be within [0, 1], got {v}")));
    }
    Ok(())
}

impl Default for SlaParams {
    fn default() -> Self {
        Self {
            price_range: default_price_range(),
            commitment_min_time_fraction: default_min_time_fraction(),
            sla_competition_factor: default_competition_factor(),
            performance_hysteresis_epochs: default_hysteresis_epochs(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub market_id: String,
    pub asset: String,

    /// Highest fee a provider may bid
    pub max_fee: Decimal,
    /// Max number of orders per shape side
    pub max_shape_size: usize,

    /// Commitment → shape obligation
    pub stake_to_obligation_factor: Decimal,
    /// Commitment → notional volume required by the SLA
    pub stake_to_ccy_volume: Decimal,

    pub non_performance_bond_penalty_slope: Decimal,
    pub non_performance_bond_penalty_max: Decimal,

    /// Minimum interval between two fee distributions, in nanoseconds
    pub fee_calculation_time_step: Timestamp,

    pub min_probability_of_trading: Decimal,
    pub probability_of_trading_tau_scaling: Decimal,
    /// Probability assigned near the touch before the curve reaches consensus
    pub default_in_range_probability: Decimal,
    /// Relative distance from best bid/ask that counts as "near the touch"
    pub default_probability_range: Decimal,
    /// Spacing of the probability curve grid, relative to best bid/ask
    pub probability_offset_step: Decimal,
    pub probability_offset_count: usize,

    /// 10^position decimals; divides price × size into notional
    pub position_factor: Decimal,

    pub sla: SlaParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            market_id: "market-id".to_string(),
            asset: "asset-id".to_string(),
            max_fee: Decimal::ONE,
            max_shape_size: 5,
            stake_to_obligation_factor: Decimal::ONE,
            stake_to_ccy_volume: Decimal::ONE,
            non_performance_bond_penalty_slope: Decimal::TWO,
            non_performance_bond_penalty_max: Decimal::new(5, 1),
            fee_calculation_time_step: 60_000_000_000,
            min_probability_of_trading: Decimal::new(1, 8),
            probability_of_trading_tau_scaling: Decimal::ONE,
            default_in_range_probability: Decimal::new(5, 1),
            default_probability_range: Decimal::new(2, 1),
            probability_offset_step: Decimal::new(5, 3),
            probability_offset_count: 100,
            position_factor: Decimal::ONE,
            sla: SlaParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.market_id.is_empty() {
            return Err(Error::Config("market_id is empty".into()));
        }
        if self.max_fee.is_sign_negative() {
            return Err(Error::Config(format!("max_fee is negative: {}", self.max_fee)));
        }
        if self.max_shape_size == 0 {
            return Err(Error::Config("max_shape_size must be > 0".into()));
        }
        if self.position_factor <= Decimal::ZERO {
            return Err(Error::Config("position_factor must be > 0".into()));
        }
        if self.probability_offset_step <= Decimal::ZERO || self.probability_offset_count == 0 {
            return Err(Error::Config("probability curve grid is empty".into()));
        }
        if self.fee_calculation_time_step < 0 {
            return Err(Error::Config("fee_calculation_time_step is negative".into()));
        }
        unit_fraction("min_probability_of_trading", self.min_probability_of_trading)?;
        unit_fraction("default_in_range_probability", self.default_in_range_probability)?;
        unit_fraction("default_probability_range", self.default_probability_range)?;
        self.sla.validate()?;
        if self.non_performance_bond_penalty_slope.is_sign_negative()
            || self.non_performance_bond_penalty_max.is_sign_negative()
        {
            return Err(Error::Config("bond penalty parameters must be >= 0".into()));
        }
        Ok(())
    }
}
