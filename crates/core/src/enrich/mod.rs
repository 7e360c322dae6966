pub mod anthropic;
pub mod contract;
pub mod error;
pub mod json;

use crate::domain::constraints::{ConstraintSet, RiskTolerance, Strategy};
use crate::domain::portfolio::{CapitalTier, Portfolio, PortfolioNarrative};
use crate::market::cache::TtlCache;

/// Cache namespace for narrative results. Slower-moving than quotes, so it
/// runs on its own, longer TTL.
pub type EnrichmentCache = TtlCache<PortfolioNarrative>;

#[derive(Debug, Clone)]
pub enum Provider {
    Anthropic,
}

/// What the narrative model is shown: the finished numeric portfolio it must
/// comment on. Enrichment never feeds anything back into the numbers.
#[derive(Debug, Clone)]
pub struct NarrativeInput {
    pub strategy: Strategy,
    pub risk_tolerance: RiskTolerance,
    pub tier: CapitalTier,
    /// Sorted; the narrative must cover each exactly once.
    pub expected_symbols: Vec<String>,
    pub positions: serde_json::Value,
}

impl NarrativeInput {
    pub fn from_portfolio(portfolio: &Portfolio, constraints: &ConstraintSet) -> Self {
        let mut expected_symbols: Vec<String> = portfolio
            .allocations
            .iter()
            .map(|a| a.symbol.clone())
            .collect();
        expected_symbols.sort();

        let positions = serde_json::Value::Array(
            portfolio
                .allocations
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "symbol": a.symbol,
                        "name": a.name,
                        "sector": a.sector,
                        "shares": a.shares,
                        "allocation_amount": a.allocation_amount,
                        "predicted_return_pct": a.predicted_return_pct,
                        "risk_score": a.risk_score,
                    })
                })
                .collect(),
        );

        Self {
            strategy: constraints.strategy,
            risk_tolerance: constraints.risk_tolerance,
            tier: portfolio.tier,
            expected_symbols,
            positions,
        }
    }

    /// Deterministic cache key: the same positions under the same mandate
    /// reuse a cached narrative.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.strategy,
            self.risk_tolerance,
            self.tier.label(),
            self.expected_symbols.join(",")
        )
    }

    pub fn positions_json(&self) -> String {
        self.positions.to_string()
    }
}

#[async_trait::async_trait]
pub trait NarrativeClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn narrate_portfolio(&self, input: NarrativeInput)
        -> anyhow::Result<PortfolioNarrative>;
}
