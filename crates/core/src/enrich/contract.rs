use crate::domain::portfolio::{NarrativeItem, PortfolioNarrative};
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Raw narrative shape as the LLM emits it, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmNarrative {
    pub headline: String,
    pub market_comment: Option<String>,
    pub items: Vec<LlmNarrativeItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmNarrativeItem {
    pub symbol: String,
    pub commentary: String,
    pub conviction: Option<f64>,
}

impl LlmNarrative {
    /// Enforce the narrative contract against the portfolio it annotates:
    /// one commentary per allocated symbol, no extras, no duplicates.
    pub fn validate_and_into_narrative(
        self,
        expected_symbols: &[String],
    ) -> anyhow::Result<PortfolioNarrative> {
        let headline = self.headline.trim().to_string();
        ensure!(!headline.is_empty(), "headline must be non-empty");

        ensure!(
            self.items.len() == expected_symbols.len(),
            "narrative must cover exactly {} position(s) (got {})",
            expected_symbols.len(),
            self.items.len()
        );

        let expected: BTreeSet<&str> = expected_symbols.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::<String>::new();
        let mut items = Vec::with_capacity(self.items.len());
        for item in self.items {
            let symbol = item.symbol.trim().to_string();
            ensure!(!symbol.is_empty(), "narrative symbol must be non-empty");
            ensure!(
                expected.contains(symbol.as_str()),
                "narrative covers {symbol}, which is not in the portfolio"
            );
            ensure!(seen.insert(symbol.clone()), "duplicate narrative for {symbol}");

            let commentary = item.commentary.trim().to_string();
            ensure!(
                !commentary.is_empty(),
                "commentary for {symbol} must be non-empty"
            );

            if let Some(conviction) = item.conviction {
                ensure!(
                    (0.0..=1.0).contains(&conviction),
                    "conviction for {symbol} must be between 0 and 1 (got {conviction})"
                );
            }

            items.push(NarrativeItem {
                symbol,
                commentary,
                conviction: item.conviction,
            });
        }

        let market_comment = self
            .market_comment
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(PortfolioNarrative {
            headline,
            market_comment,
            items,
        })
    }
}
