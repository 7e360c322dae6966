use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_TOTAL_CAPITAL: f64 = 50.0;
pub const MAX_TOTAL_CAPITAL: f64 = 10_000.0;

pub const DEFAULT_TOTAL_CAPITAL: f64 = 1_000.0;
pub const DEFAULT_MIN_DIVERSIFICATION: usize = 3;
pub const DEFAULT_MAX_SINGLE_STOCK_FRACTION: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskTolerance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTolerance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "very_low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "moderate" => Ok(Self::Moderate),
            "high" => Ok(Self::High),
            "very_high" => Ok(Self::VeryHigh),
            other => Err(format!("unknown risk tolerance: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Conservative,
    Balanced,
    Growth,
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Growth => "growth",
            Self::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "growth" => Ok(Self::Growth),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// User-supplied sizing and risk constraints for one recommendation request.
/// Immutable once validated. Wire defaults match the request schema of the
/// public API, so an empty JSON body is a valid request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSet {
    #[serde(default = "default_total_capital")]
    pub total_capital: f64,

    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: RiskTolerance,

    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    /// Desired lower bound on the number of positions. Advisory: the capital
    /// tier may force fewer, which surfaces as a portfolio warning.
    #[serde(default = "default_min_diversification")]
    pub min_diversification: usize,

    /// Fraction of total capital any single position may consume, in (0, 1].
    #[serde(default = "default_max_single_stock_fraction")]
    pub max_single_stock_fraction: f64,
}

fn default_total_capital() -> f64 {
    DEFAULT_TOTAL_CAPITAL
}

fn default_risk_tolerance() -> RiskTolerance {
    RiskTolerance::Moderate
}

fn default_strategy() -> Strategy {
    Strategy::Balanced
}

fn default_min_diversification() -> usize {
    DEFAULT_MIN_DIVERSIFICATION
}

fn default_max_single_stock_fraction() -> f64 {
    DEFAULT_MAX_SINGLE_STOCK_FRACTION
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            total_capital: DEFAULT_TOTAL_CAPITAL,
            risk_tolerance: RiskTolerance::Moderate,
            strategy: Strategy::Balanced,
            min_diversification: DEFAULT_MIN_DIVERSIFICATION,
            max_single_stock_fraction: DEFAULT_MAX_SINGLE_STOCK_FRACTION,
        }
    }
}

impl ConstraintSet {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.total_capital.is_finite()
            || self.total_capital < MIN_TOTAL_CAPITAL
            || self.total_capital > MAX_TOTAL_CAPITAL
        {
            return Err(PipelineError::InvalidConstraints {
                detail: format!(
                    "total_capital must be between ${MIN_TOTAL_CAPITAL} and ${MAX_TOTAL_CAPITAL} (got {})",
                    self.total_capital
                ),
            });
        }

        if self.min_diversification < 1 {
            return Err(PipelineError::InvalidConstraints {
                detail: "min_diversification must be at least 1".to_string(),
            });
        }

        if !self.max_single_stock_fraction.is_finite()
            || self.max_single_stock_fraction <= 0.0
            || self.max_single_stock_fraction > 1.0
        {
            return Err(PipelineError::InvalidConstraints {
                detail: format!(
                    "max_single_stock_fraction must be in (0, 1] (got {})",
                    self.max_single_stock_fraction
                ),
            });
        }

        Ok(())
    }
}
