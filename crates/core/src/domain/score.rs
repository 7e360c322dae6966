use serde::{Deserialize, Serialize};
use std::fmt;

pub const RISK_BAND_MODERATE_FLOOR: f64 = 0.4;
pub const RISK_BAND_HIGH_FLOOR: f64 = 0.6;
pub const RISK_BAND_VERY_HIGH_FLOOR: f64 = 0.8;

/// Trading signal emitted by the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
}

/// Risk classification over `risk_score`. Bands are half-open and cover
/// [0, 1] without overlap; ordering follows increasing risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskBand {
    pub fn from_risk_score(risk_score: f64) -> Self {
        if risk_score >= RISK_BAND_VERY_HIGH_FLOOR {
            Self::VeryHigh
        } else if risk_score >= RISK_BAND_HIGH_FLOOR {
            Self::High
        } else if risk_score >= RISK_BAND_MODERATE_FLOOR {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one scoring pass for one symbol. Derived from a quote and its
/// cache freshness; never cached independently of the quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub symbol: String,
    /// Composite ranking value. Higher ranks earlier; unbounded in theory,
    /// in practice roughly [-0.2, 1.0].
    pub composite_value: f64,
    /// Trust in the inputs, in [0, 1]. Monotonic non-increasing with quote
    /// staleness and with missing fundamentals.
    pub confidence: f64,
    pub risk_score: f64,
    pub risk_band: RiskBand,
    pub predicted_return_pct: f64,
    pub signal: Signal,
}
