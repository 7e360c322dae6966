//! Capital-aware portfolio construction. Pure: all inputs come in as
//! arguments and identical inputs produce identical portfolios.

use crate::domain::constraints::{ConstraintSet, RiskTolerance, Strategy};
use crate::domain::instrument::{Instrument, Universe};
use crate::domain::portfolio::{Allocation, CapitalTier, Portfolio};
use crate::domain::quote::Quote;
use crate::domain::score::{RiskBand, Score};
use crate::error::PipelineError;
use crate::market::cache::CachedQuote;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

// Ten or more positions count as fully diversified.
const DIVERSIFICATION_FULL_SCORE_POSITIONS: f64 = 10.0;
const HIGH_CASH_WARNING_FRACTION: f64 = 0.20;
const ELEVATED_RISK_WARNING_SCORE: f64 = 0.7;

struct Candidate<'a> {
    score: &'a Score,
    quote: &'a Quote,
    instrument: &'a Instrument,
}

/// Construct a portfolio from scored candidates.
///
/// Ranking is composite descending with ties broken by confidence
/// descending, then symbol ascending, so equal inputs can never reorder
/// between runs. Position count is capped by the capital tier; proportional
/// allocation respects the per-instrument cap with a single greedy
/// redistribution pass in rank order, and whole-share flooring remainders
/// end up in `unallocated_capital`.
pub fn build_portfolio(
    recommendation_id: Uuid,
    generated_at: DateTime<Utc>,
    scores: &BTreeMap<String, Score>,
    quotes: &BTreeMap<String, CachedQuote>,
    universe: &Universe,
    constraints: &ConstraintSet,
) -> Result<Portfolio, PipelineError> {
    constraints.validate()?;

    let tier = CapitalTier::from_capital(constraints.total_capital);
    let strategy_cap = strategy_max_band(constraints.strategy);
    let tolerance_cap = tolerance_max_band(constraints.risk_tolerance);

    let mut eligible: Vec<Candidate<'_>> = scores
        .values()
        .filter_map(|score| {
            let quote = quotes.get(&score.symbol).map(|c| &c.quote)?;
            let instrument = universe.get(&score.symbol)?;
            Some(Candidate {
                score,
                quote,
                instrument,
            })
        })
        .filter(|c| {
            c.score.risk_score <= tier.risk_score_cap()
                && c.score.risk_band <= strategy_cap
                && c.score.risk_band <= tolerance_cap
        })
        .collect();

    if eligible.is_empty() {
        return Err(PipelineError::NoEligibleInstruments {
            candidates: scores.len(),
            detail: format!(
                "risk filters for the {tier} tier, {} strategy and {} tolerance excluded every candidate",
                constraints.strategy, constraints.risk_tolerance
            ),
        });
    }

    eligible.sort_by(|a, b| {
        b.score
            .composite_value
            .total_cmp(&a.score.composite_value)
            .then_with(|| b.score.confidence.total_cmp(&a.score.confidence))
            .then_with(|| a.score.symbol.cmp(&b.score.symbol))
    });

    let cheapest = eligible
        .iter()
        .min_by(|a, b| a.quote.current_price.total_cmp(&b.quote.current_price))
        .map(|c| (c.score.symbol.clone(), c.quote.current_price));
    if let Some((symbol, price)) = cheapest {
        if constraints.total_capital < price {
            return Err(PipelineError::InsufficientCapital {
                total_capital: constraints.total_capital,
                detail: format!("cheapest eligible share ({symbol}) costs ${price:.2}"),
            });
        }
    }

    let target_positions = tier.max_positions().min(eligible.len());
    let selected = &eligible[..target_positions];

    // Proportional to positive composite; equal split when nothing is
    // positive. A single pass in rank order carries capped excess forward;
    // whatever the last position cannot absorb becomes unallocated.
    let raw_weights: Vec<f64> = selected
        .iter()
        .map(|c| c.score.composite_value.max(0.0))
        .collect();
    let weight_sum: f64 = raw_weights.iter().sum();

    let position_cap = constraints.total_capital * constraints.max_single_stock_fraction;
    let mut carry = 0.0;
    let mut budgets = Vec::with_capacity(selected.len());
    for raw in &raw_weights {
        let weight = if weight_sum > 0.0 {
            raw / weight_sum
        } else {
            1.0 / selected.len() as f64
        };
        let desired = weight * constraints.total_capital + carry;
        let granted = desired.min(position_cap);
        carry = desired - granted;
        budgets.push(granted);
    }

    let mut allocations = Vec::with_capacity(selected.len());
    for (candidate, budget) in selected.iter().zip(&budgets) {
        let price = candidate.quote.current_price;
        let shares = (budget / price).floor() as u64;
        if shares == 0 {
            continue;
        }

        let amount = shares as f64 * price;
        let predicted_return_pct = candidate.score.predicted_return_pct;
        allocations.push(Allocation {
            symbol: candidate.score.symbol.clone(),
            name: candidate.instrument.name.clone(),
            sector: candidate.instrument.sector.clone(),
            shares,
            allocation_amount: amount,
            current_price: price,
            target_price: round2(price * (1.0 + predicted_return_pct / 100.0)),
            predicted_return_pct,
            confidence: candidate.score.confidence,
            risk_score: candidate.score.risk_score,
            reasoning: reasoning_line(candidate, constraints),
        });
    }

    if allocations.is_empty() {
        return Err(PipelineError::InsufficientCapital {
            total_capital: constraints.total_capital,
            detail: format!(
                "per-position cap ${position_cap:.2} floors every selected position to zero shares"
            ),
        });
    }

    let total_investment: f64 = allocations.iter().map(|a| a.allocation_amount).sum();
    let unallocated_capital = constraints.total_capital - total_investment;
    let expected_return_pct = capital_weighted(&allocations, |a| a.predicted_return_pct);
    let portfolio_risk_score = capital_weighted(&allocations, |a| a.risk_score);
    let diversification_score =
        (allocations.len() as f64 / DIVERSIFICATION_FULL_SCORE_POSITIONS).min(1.0);

    let mut warnings = Vec::new();
    if allocations.len() < constraints.min_diversification {
        warnings.push(format!(
            "Limited diversification: {} position(s) against a requested minimum of {}",
            allocations.len(),
            constraints.min_diversification
        ));
    }
    if unallocated_capital > HIGH_CASH_WARNING_FRACTION * constraints.total_capital {
        warnings.push(format!(
            "High cash reserve: ${:.2} ({:.0}% of capital) stays uninvested",
            unallocated_capital,
            100.0 * unallocated_capital / constraints.total_capital
        ));
    }
    if portfolio_risk_score > ELEVATED_RISK_WARNING_SCORE {
        warnings.push(format!(
            "Elevated portfolio risk: capital-weighted risk score {portfolio_risk_score:.2}"
        ));
    }

    let summary = format!(
        "Tier {} portfolio: {} ASX position(s) for ${:.0} capital with {} risk tolerance and {} strategy. Expected return: {:.1}%.",
        tier,
        allocations.len(),
        constraints.total_capital,
        constraints.risk_tolerance,
        constraints.strategy,
        expected_return_pct
    );

    Ok(Portfolio {
        recommendation_id,
        generated_at,
        tier,
        allocations,
        total_investment,
        unallocated_capital,
        expected_return_pct,
        portfolio_risk_score,
        diversification_score,
        summary,
        warnings,
        narrative: None,
    })
}

fn reasoning_line(candidate: &Candidate<'_>, constraints: &ConstraintSet) -> String {
    format!(
        "{} ({}) - confidence {:.0}%, risk {:.2}, predicted return {:.1}%. Suitable for {} risk tolerance with {} strategy.",
        candidate.instrument.name,
        candidate.instrument.sector,
        candidate.score.confidence * 100.0,
        candidate.score.risk_score,
        candidate.score.predicted_return_pct,
        constraints.risk_tolerance,
        constraints.strategy
    )
}

fn capital_weighted(allocations: &[Allocation], field: impl Fn(&Allocation) -> f64) -> f64 {
    let total: f64 = allocations.iter().map(|a| a.allocation_amount).sum();
    if total <= 0.0 {
        return 0.0;
    }
    allocations
        .iter()
        .map(|a| a.allocation_amount * field(a))
        .sum::<f64>()
        / total
}

/// Riskiest band each strategy will hold.
fn strategy_max_band(strategy: Strategy) -> RiskBand {
    match strategy {
        Strategy::Conservative => RiskBand::Moderate,
        Strategy::Balanced => RiskBand::High,
        Strategy::Growth => RiskBand::VeryHigh,
        Strategy::Aggressive => RiskBand::VeryHigh,
    }
}

/// Riskiest band each stated tolerance will hold.
fn tolerance_max_band(tolerance: RiskTolerance) -> RiskBand {
    match tolerance {
        RiskTolerance::VeryLow => RiskBand::Low,
        RiskTolerance::Low => RiskBand::Moderate,
        RiskTolerance::Moderate => RiskBand::High,
        RiskTolerance::High => RiskBand::VeryHigh,
        RiskTolerance::VeryHigh => RiskBand::VeryHigh,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::score::Signal;
    use crate::market::cache::Freshness;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap()
    }

    fn quote(symbol: &str, price: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            current_price: price,
            daily_change_pct: 1.0,
            volume: 1_000_000,
            fifty_two_week_high: Some(price * 1.25),
            fifty_two_week_low: Some(price * 0.80),
            fetched_at: at(),
            source: "test".to_string(),
        }
    }

    fn score(symbol: &str, composite: f64, confidence: f64, risk: f64) -> Score {
        score_with_return(symbol, composite, confidence, risk, 5.0)
    }

    fn score_with_return(
        symbol: &str,
        composite: f64,
        confidence: f64,
        risk: f64,
        predicted_return_pct: f64,
    ) -> Score {
        Score {
            symbol: symbol.to_string(),
            composite_value: composite,
            confidence,
            risk_score: risk,
            risk_band: RiskBand::from_risk_score(risk),
            predicted_return_pct,
            signal: Signal::Buy,
        }
    }

    struct Fixture {
        scores: BTreeMap<String, Score>,
        quotes: BTreeMap<String, CachedQuote>,
        universe: Universe,
    }

    impl Fixture {
        fn new(rows: &[(&str, f64, Score)]) -> Self {
            let mut scores = BTreeMap::new();
            let mut quotes = BTreeMap::new();
            let mut instruments = Vec::new();
            for (symbol, price, score) in rows {
                scores.insert(symbol.to_string(), score.clone());
                quotes.insert(
                    symbol.to_string(),
                    CachedQuote {
                        quote: quote(symbol, *price),
                        freshness: Freshness::Fresh,
                    },
                );
                instruments.push(Instrument {
                    symbol: symbol.to_string(),
                    name: format!("{} Ltd", symbol.trim_end_matches(".AX")),
                    sector: "Test".to_string(),
                });
            }
            Self {
                scores,
                quotes,
                universe: Universe::new(instruments),
            }
        }

        fn build(&self, constraints: &ConstraintSet) -> Result<Portfolio, PipelineError> {
            build_portfolio(
                Uuid::nil(),
                at(),
                &self.scores,
                &self.quotes,
                &self.universe,
                constraints,
            )
        }
    }

    fn constraints(capital: f64) -> ConstraintSet {
        ConstraintSet {
            total_capital: capital,
            max_single_stock_fraction: 1.0,
            min_diversification: 1,
            ..ConstraintSet::default()
        }
    }

    #[test]
    fn micro_tier_holds_exactly_one_position() {
        // $120 is Micro: only the top-ranked instrument is funded, and the
        // whole-share remainder stays unallocated.
        let fx = Fixture::new(&[
            ("AAA.AX", 100.0, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 20.0, score("BBB.AX", 0.5, 0.9, 0.3)),
        ]);

        let portfolio = fx.build(&constraints(120.0)).unwrap();
        assert_eq!(portfolio.tier, CapitalTier::Micro);
        assert_eq!(portfolio.allocations.len(), 1);

        let top = &portfolio.allocations[0];
        assert_eq!(top.symbol, "AAA.AX");
        assert_eq!(top.shares, 1);
        assert_eq!(top.allocation_amount, 100.0);
        assert!((portfolio.unallocated_capital - 20.0).abs() < 1e-9);
    }

    #[test]
    fn capital_below_cheapest_share_is_an_error() {
        let fx = Fixture::new(&[
            ("AAA.AX", 80.0, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 65.0, score("BBB.AX", 0.5, 0.9, 0.3)),
        ]);

        let err = fx.build(&constraints(60.0)).unwrap_err();
        match err {
            PipelineError::InsufficientCapital { total_capital, detail } => {
                assert_eq!(total_capital, 60.0);
                assert!(detail.contains("BBB.AX"));
            }
            other => panic!("expected InsufficientCapital, got {other:?}"),
        }
    }

    #[test]
    fn risk_filters_can_exclude_everything() {
        let fx = Fixture::new(&[
            ("AAA.AX", 10.0, score("AAA.AX", 0.9, 0.9, 0.95)),
            ("BBB.AX", 10.0, score("BBB.AX", 0.8, 0.9, 0.85)),
        ]);

        let c = ConstraintSet {
            total_capital: 1_000.0,
            risk_tolerance: RiskTolerance::VeryLow,
            strategy: Strategy::Conservative,
            ..constraints(1_000.0)
        };
        let err = fx.build(&c).unwrap_err();
        match err {
            PipelineError::NoEligibleInstruments { candidates, .. } => {
                assert_eq!(candidates, 2)
            }
            other => panic!("expected NoEligibleInstruments, got {other:?}"),
        }
    }

    #[test]
    fn ties_break_by_confidence_then_symbol() {
        let fx = Fixture::new(&[
            ("AAA.AX", 10.0, score("AAA.AX", 0.8, 0.90, 0.3)),
            ("BBB.AX", 10.0, score("BBB.AX", 0.8, 0.95, 0.3)),
            ("CCC.AX", 10.0, score("CCC.AX", 0.8, 0.90, 0.3)),
        ]);

        let portfolio = fx.build(&constraints(2_000.0)).unwrap();
        let order: Vec<_> = portfolio
            .allocations
            .iter()
            .map(|a| a.symbol.as_str())
            .collect();
        assert_eq!(order, vec!["BBB.AX", "AAA.AX", "CCC.AX"]);
    }

    #[test]
    fn capital_is_conserved_to_the_cent_and_beyond() {
        let fx = Fixture::new(&[
            ("AAA.AX", 37.80, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 7.20, score("BBB.AX", 0.6, 0.9, 0.3)),
            ("CCC.AX", 3.95, score("CCC.AX", 0.4, 0.9, 0.3)),
        ]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.5,
            ..constraints(1_000.0)
        };
        let portfolio = fx.build(&c).unwrap();

        let recomputed: f64 = portfolio
            .allocations
            .iter()
            .map(|a| a.shares as f64 * a.current_price)
            .sum();
        assert!((portfolio.total_investment - recomputed).abs() < 1e-9);
        assert!(
            (portfolio.total_investment + portfolio.unallocated_capital - 1_000.0).abs() < 1e-9
        );
        assert!(portfolio.unallocated_capital >= 0.0);
    }

    #[test]
    fn no_position_exceeds_the_single_stock_cap() {
        let fx = Fixture::new(&[
            ("AAA.AX", 10.0, score("AAA.AX", 1.0, 0.9, 0.3)),
            ("BBB.AX", 10.0, score("BBB.AX", 0.1, 0.9, 0.3)),
            ("CCC.AX", 10.0, score("CCC.AX", 0.1, 0.9, 0.3)),
        ]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.30,
            ..constraints(1_000.0)
        };
        let portfolio = fx.build(&c).unwrap();
        for allocation in &portfolio.allocations {
            assert!(
                allocation.allocation_amount <= 300.0 + 1e-9,
                "{} exceeds cap",
                allocation.symbol
            );
        }
    }

    #[test]
    fn capped_excess_flows_down_the_ranking_once() {
        // Weights 62.5% / 31.25% / 6.25% against a $300 cap: every position
        // fills to the cap and the terminal $100 of excess stays uninvested.
        let fx = Fixture::new(&[
            ("AAA.AX", 1.0, score("AAA.AX", 1.0, 0.9, 0.3)),
            ("BBB.AX", 1.0, score("BBB.AX", 0.5, 0.9, 0.3)),
            ("CCC.AX", 1.0, score("CCC.AX", 0.1, 0.9, 0.3)),
        ]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.30,
            ..constraints(1_000.0)
        };
        let portfolio = fx.build(&c).unwrap();

        let amounts: Vec<f64> = portfolio
            .allocations
            .iter()
            .map(|a| a.allocation_amount)
            .collect();
        assert_eq!(amounts, vec![300.0, 300.0, 300.0]);
        assert!((portfolio.unallocated_capital - 100.0).abs() < 1e-9);
    }

    #[test]
    fn position_count_is_monotone_in_capital() {
        let rows: Vec<(String, f64, Score)> = (0..15)
            .map(|i| {
                let symbol = format!("S{i:02}.AX");
                (
                    symbol.clone(),
                    5.0,
                    score(&symbol, 0.9 - i as f64 * 0.01, 0.9, 0.3),
                )
            })
            .collect();
        let borrowed: Vec<(&str, f64, Score)> = rows
            .iter()
            .map(|(s, p, sc)| (s.as_str(), *p, sc.clone()))
            .collect();
        let fx = Fixture::new(&borrowed);

        let mut last = 0;
        for capital in [400.0, 1_500.0, 4_000.0, 10_000.0] {
            let portfolio = fx.build(&constraints(capital)).unwrap();
            assert!(
                portfolio.allocations.len() >= last,
                "positions shrank at ${capital}"
            );
            last = portfolio.allocations.len();
        }
        assert_eq!(last, 15);
    }

    #[test]
    fn zero_share_positions_are_dropped_not_listed() {
        // BBB's capped budget cannot buy one $400 share; the portfolio skips
        // it rather than emit a zero-share line.
        let fx = Fixture::new(&[
            ("AAA.AX", 50.0, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 400.0, score("BBB.AX", 0.8, 0.9, 0.3)),
            ("CCC.AX", 10.0, score("CCC.AX", 0.1, 0.9, 0.3)),
        ]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.30,
            ..constraints(1_000.0)
        };
        let portfolio = fx.build(&c).unwrap();

        let symbols: Vec<_> = portfolio
            .allocations
            .iter()
            .map(|a| a.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["AAA.AX", "CCC.AX"]);
        assert!(portfolio.allocations.iter().all(|a| a.shares > 0));
    }

    #[test]
    fn cap_that_floors_everything_is_insufficient_capital() {
        let fx = Fixture::new(&[("AAA.AX", 100.0, score("AAA.AX", 0.9, 0.9, 0.3))]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.30,
            ..constraints(120.0)
        };
        let err = fx.build(&c).unwrap_err();
        match err {
            PipelineError::InsufficientCapital { detail, .. } => {
                assert!(detail.contains("cap"));
            }
            other => panic!("expected InsufficientCapital, got {other:?}"),
        }
    }

    #[test]
    fn expected_return_is_capital_weighted() {
        let fx = Fixture::new(&[
            (
                "AAA.AX",
                750.0,
                score_with_return("AAA.AX", 0.75, 0.9, 0.3, 10.0),
            ),
            (
                "BBB.AX",
                250.0,
                score_with_return("BBB.AX", 0.25, 0.9, 0.3, 2.0),
            ),
        ]);

        let portfolio = fx.build(&constraints(1_000.0)).unwrap();
        assert_eq!(portfolio.allocations.len(), 2);
        assert!((portfolio.expected_return_pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn warnings_cover_diversification_and_idle_cash() {
        let fx = Fixture::new(&[
            ("AAA.AX", 50.0, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 400.0, score("BBB.AX", 0.8, 0.9, 0.3)),
            ("CCC.AX", 10.0, score("CCC.AX", 0.1, 0.9, 0.3)),
        ]);

        let c = ConstraintSet {
            max_single_stock_fraction: 0.30,
            min_diversification: 3,
            ..constraints(1_000.0)
        };
        let portfolio = fx.build(&c).unwrap();

        assert!(portfolio
            .warnings
            .iter()
            .any(|w| w.contains("Limited diversification")));
        assert!(portfolio
            .warnings
            .iter()
            .any(|w| w.contains("High cash reserve")));
    }

    #[test]
    fn summary_names_tier_tolerance_and_strategy() {
        let fx = Fixture::new(&[("AAA.AX", 10.0, score("AAA.AX", 0.9, 0.9, 0.3))]);

        let portfolio = fx.build(&constraints(1_000.0)).unwrap();
        assert!(portfolio.summary.contains("Tier Small"));
        assert!(portfolio.summary.contains("moderate risk tolerance"));
        assert!(portfolio.summary.contains("balanced strategy"));
        assert!(portfolio
            .allocations
            .iter()
            .all(|a| a.reasoning.contains("Suitable for moderate risk tolerance")));
    }

    #[test]
    fn identical_inputs_build_identical_portfolios() {
        let fx = Fixture::new(&[
            ("AAA.AX", 37.80, score("AAA.AX", 0.9, 0.9, 0.3)),
            ("BBB.AX", 7.20, score("BBB.AX", 0.6, 0.8, 0.4)),
            ("CCC.AX", 3.95, score("CCC.AX", 0.4, 0.7, 0.5)),
        ]);
        let c = constraints(1_500.0);

        let a = fx.build(&c).unwrap();
        let b = fx.build(&c).unwrap();
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }
}
