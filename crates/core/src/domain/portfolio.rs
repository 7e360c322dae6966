use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const TIER_MICRO_MAX_CAPITAL: f64 = 500.0;
pub const TIER_SMALL_MAX_CAPITAL: f64 = 2_000.0;
pub const TIER_MEDIUM_MAX_CAPITAL: f64 = 5_000.0;

pub const TIER_MICRO_MAX_POSITIONS: usize = 1;
pub const TIER_SMALL_MAX_POSITIONS: usize = 3;
pub const TIER_MEDIUM_MAX_POSITIONS: usize = 7;
pub const TIER_LARGE_MAX_POSITIONS: usize = 15;

/// Capital tier step function. Tier bounds are inclusive upper edges, so
/// $500 is still Micro and $2000 is still Small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapitalTier {
    Micro,
    Small,
    Medium,
    Large,
}

impl CapitalTier {
    pub fn from_capital(total_capital: f64) -> Self {
        if total_capital <= TIER_MICRO_MAX_CAPITAL {
            Self::Micro
        } else if total_capital <= TIER_SMALL_MAX_CAPITAL {
            Self::Small
        } else if total_capital <= TIER_MEDIUM_MAX_CAPITAL {
            Self::Medium
        } else {
            Self::Large
        }
    }

    /// Hard cap on position count for the tier.
    pub fn max_positions(&self) -> usize {
        match self {
            Self::Micro => TIER_MICRO_MAX_POSITIONS,
            Self::Small => TIER_SMALL_MAX_POSITIONS,
            Self::Medium => TIER_MEDIUM_MAX_POSITIONS,
            Self::Large => TIER_LARGE_MAX_POSITIONS,
        }
    }

    /// Maximum per-instrument risk score the tier will hold.
    pub fn risk_score_cap(&self) -> f64 {
        match self {
            Self::Micro => 0.5,
            Self::Small => 0.6,
            Self::Medium => 0.7,
            Self::Large => 0.8,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Micro => "Micro",
            Self::Small => "Small",
            Self::Medium => "Medium",
            Self::Large => "Large",
        }
    }
}

impl fmt::Display for CapitalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One funded position in a recommended portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    /// Whole shares only; zero-share positions are never emitted.
    pub shares: u64,
    pub allocation_amount: f64,
    pub current_price: f64,
    pub target_price: f64,
    pub predicted_return_pct: f64,
    pub confidence: f64,
    pub risk_score: f64,
    pub reasoning: String,
}

/// LLM-written commentary attached to a portfolio. Best-effort: its absence
/// never invalidates the numeric result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioNarrative {
    pub headline: String,
    pub market_comment: Option<String>,
    pub items: Vec<NarrativeItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeItem {
    pub symbol: String,
    pub commentary: String,
    pub conviction: Option<f64>,
}

/// Final recommendation output: funded allocations plus portfolio-level
/// aggregates. `total_investment + unallocated_capital` always equals the
/// requested capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub recommendation_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub tier: CapitalTier,
    pub allocations: Vec<Allocation>,
    pub total_investment: f64,
    pub unallocated_capital: f64,
    /// Capital-weighted mean of the allocations' predicted returns.
    pub expected_return_pct: f64,
    pub portfolio_risk_score: f64,
    pub diversification_score: f64,
    pub summary: String,
    pub warnings: Vec<String>,
    pub narrative: Option<PortfolioNarrative>,
}
