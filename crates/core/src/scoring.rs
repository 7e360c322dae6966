//! Pure scoring over cached quotes. No clock reads, no I/O, no randomness:
//! identical inputs always produce identical scores.

use crate::domain::constraints::{RiskTolerance, Strategy};
use crate::domain::quote::Quote;
use crate::domain::score::{RiskBand, Score, Signal};
use crate::market::cache::Freshness;

// A daily move of this magnitude saturates the momentum signal.
const MOMENTUM_FULL_SCALE_PCT: f64 = 5.0;
// Same, for the volatility proxy inside the risk score.
const VOLATILITY_FULL_SCALE_PCT: f64 = 5.0;
// 25% headroom to the 52-week high saturates the growth signal.
const GROWTH_HEADROOM_FULL_SCALE: f64 = 0.25;

const NEUTRAL_SIGNAL: f64 = 0.5;
const NEUTRAL_RANGE_POSITION: f64 = 0.5;

const RANGE_POSITION_RISK_WEIGHT: f64 = 0.6;
const VOLATILITY_RISK_WEIGHT: f64 = 0.4;

const MISSING_RANGE_COMPLETENESS_FACTOR: f64 = 0.7;
const ZERO_VOLUME_COMPLETENESS_FACTOR: f64 = 0.9;

const FRESH_CONFIDENCE_FACTOR: f64 = 1.0;
const STALE_CONFIDENCE_FACTOR: f64 = 0.8;
const ANCIENT_CONFIDENCE_FACTOR: f64 = 0.5;

const RETURN_MOMENTUM_WEIGHT: f64 = 0.5;
const RETURN_HEADROOM_WEIGHT_PCT: f64 = 20.0;

/// Strategy-specific blend of the three signals, minus a risk penalty.
#[derive(Debug, Clone, Copy)]
struct StrategyWeights {
    momentum: f64,
    value: f64,
    growth: f64,
    risk_penalty: f64,
}

const CONSERVATIVE_WEIGHTS: StrategyWeights = StrategyWeights {
    momentum: 0.15,
    value: 0.55,
    growth: 0.10,
    risk_penalty: 0.20,
};

const BALANCED_WEIGHTS: StrategyWeights = StrategyWeights {
    momentum: 0.30,
    value: 0.30,
    growth: 0.30,
    risk_penalty: 0.10,
};

const GROWTH_WEIGHTS: StrategyWeights = StrategyWeights {
    momentum: 0.35,
    value: 0.15,
    growth: 0.45,
    risk_penalty: 0.05,
};

const AGGRESSIVE_WEIGHTS: StrategyWeights = StrategyWeights {
    momentum: 0.45,
    value: 0.05,
    growth: 0.50,
    risk_penalty: 0.0,
};

/// Minimum (composite, confidence) per signal level, per strategy.
#[derive(Debug, Clone, Copy)]
struct SignalThresholds {
    strong_buy_composite: f64,
    strong_buy_confidence: f64,
    buy_composite: f64,
    buy_confidence: f64,
}

const CONSERVATIVE_SIGNALS: SignalThresholds = SignalThresholds {
    strong_buy_composite: 0.70,
    strong_buy_confidence: 0.75,
    buy_composite: 0.55,
    buy_confidence: 0.65,
};

const BALANCED_SIGNALS: SignalThresholds = SignalThresholds {
    strong_buy_composite: 0.65,
    strong_buy_confidence: 0.70,
    buy_composite: 0.50,
    buy_confidence: 0.55,
};

const GROWTH_SIGNALS: SignalThresholds = SignalThresholds {
    strong_buy_composite: 0.60,
    strong_buy_confidence: 0.65,
    buy_composite: 0.45,
    buy_confidence: 0.50,
};

const AGGRESSIVE_SIGNALS: SignalThresholds = SignalThresholds {
    strong_buy_composite: 0.55,
    strong_buy_confidence: 0.55,
    buy_composite: 0.40,
    buy_confidence: 0.45,
};

#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    pub strategy: Strategy,
    pub risk_tolerance: RiskTolerance,
}

/// Score one quote under the given context and cache freshness.
pub fn score_quote(quote: &Quote, freshness: Freshness, ctx: &ScoringContext) -> Score {
    let momentum = momentum_signal(quote.daily_change_pct);
    let value = value_signal(quote);
    let growth = growth_signal(quote);
    let risk_score = risk_score(quote);

    let weights = strategy_weights(ctx.strategy);
    let composite_value = weights.momentum * momentum
        + weights.value * value
        + weights.growth * growth
        - weights.risk_penalty * risk_score;

    let confidence = confidence(quote, freshness);
    let predicted_return_pct = predicted_return_pct(quote, ctx);
    let signal = signal_for(ctx.strategy, composite_value, confidence);

    Score {
        symbol: quote.symbol.clone(),
        composite_value,
        confidence,
        risk_score,
        risk_band: RiskBand::from_risk_score(risk_score),
        predicted_return_pct,
        signal,
    }
}

/// Daily change mapped onto [0, 1] with 0.5 for a flat session.
fn momentum_signal(daily_change_pct: f64) -> f64 {
    let scaled = (daily_change_pct / MOMENTUM_FULL_SCALE_PCT).clamp(-1.0, 1.0);
    (scaled + 1.0) / 2.0
}

/// Lower in the 52-week range is better. Neutral without a usable range.
fn value_signal(quote: &Quote) -> f64 {
    match quote.range_position() {
        Some(position) => 1.0 - position,
        None => NEUTRAL_SIGNAL,
    }
}

/// Headroom to the 52-week high, adjusted by the period return so a symbol
/// already moving toward the high scores ahead of one drifting away.
fn growth_signal(quote: &Quote) -> f64 {
    match quote.headroom_fraction() {
        Some(headroom) => {
            let base = headroom / GROWTH_HEADROOM_FULL_SCALE;
            clamp01(base * (1.0 + quote.daily_change_pct / 100.0))
        }
        None => NEUTRAL_SIGNAL,
    }
}

fn risk_score(quote: &Quote) -> f64 {
    let position = quote.range_position().unwrap_or(NEUTRAL_RANGE_POSITION);
    let volatility = clamp01(quote.daily_change_pct.abs() / VOLATILITY_FULL_SCALE_PCT);
    clamp01(RANGE_POSITION_RISK_WEIGHT * position + VOLATILITY_RISK_WEIGHT * volatility)
}

/// Completeness of the inputs times the freshness factor. Monotonic
/// non-increasing with staleness.
fn confidence(quote: &Quote, freshness: Freshness) -> f64 {
    let mut completeness = 1.0;
    if !quote.has_full_range() {
        completeness *= MISSING_RANGE_COMPLETENESS_FACTOR;
    }
    if quote.volume == 0 {
        completeness *= ZERO_VOLUME_COMPLETENESS_FACTOR;
    }
    completeness * freshness_factor(freshness)
}

fn freshness_factor(freshness: Freshness) -> f64 {
    match freshness {
        Freshness::Fresh => FRESH_CONFIDENCE_FACTOR,
        Freshness::Stale => STALE_CONFIDENCE_FACTOR,
        Freshness::Ancient => ANCIENT_CONFIDENCE_FACTOR,
    }
}

fn predicted_return_pct(quote: &Quote, ctx: &ScoringContext) -> f64 {
    let headroom = quote.headroom_fraction().unwrap_or(0.0);
    let base = RETURN_MOMENTUM_WEIGHT * quote.daily_change_pct
        + RETURN_HEADROOM_WEIGHT_PCT * headroom;
    let scaled = base
        * strategy_return_multiplier(ctx.strategy)
        * tolerance_return_multiplier(ctx.risk_tolerance);
    round1(scaled)
}

fn signal_for(strategy: Strategy, composite: f64, confidence: f64) -> Signal {
    let t = signal_thresholds(strategy);
    if composite >= t.strong_buy_composite && confidence >= t.strong_buy_confidence {
        Signal::StrongBuy
    } else if composite >= t.buy_composite && confidence >= t.buy_confidence {
        Signal::Buy
    } else {
        Signal::Hold
    }
}

fn strategy_weights(strategy: Strategy) -> StrategyWeights {
    match strategy {
        Strategy::Conservative => CONSERVATIVE_WEIGHTS,
        Strategy::Balanced => BALANCED_WEIGHTS,
        Strategy::Growth => GROWTH_WEIGHTS,
        Strategy::Aggressive => AGGRESSIVE_WEIGHTS,
    }
}

fn signal_thresholds(strategy: Strategy) -> SignalThresholds {
    match strategy {
        Strategy::Conservative => CONSERVATIVE_SIGNALS,
        Strategy::Balanced => BALANCED_SIGNALS,
        Strategy::Growth => GROWTH_SIGNALS,
        Strategy::Aggressive => AGGRESSIVE_SIGNALS,
    }
}

pub fn strategy_return_multiplier(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Conservative => 0.7,
        Strategy::Balanced => 1.0,
        Strategy::Growth => 1.3,
        Strategy::Aggressive => 1.5,
    }
}

pub fn tolerance_return_multiplier(tolerance: RiskTolerance) -> f64 {
    match tolerance {
        RiskTolerance::VeryLow => 0.5,
        RiskTolerance::Low => 0.7,
        RiskTolerance::Moderate => 1.0,
        RiskTolerance::High => 1.3,
        RiskTolerance::VeryHigh => 1.5,
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn quote(price: f64, change_pct: f64, high: Option<f64>, low: Option<f64>) -> Quote {
        Quote {
            symbol: "CBA.AX".to_string(),
            current_price: price,
            daily_change_pct: change_pct,
            volume: 2_000_000,
            fifty_two_week_high: high,
            fifty_two_week_low: low,
            fetched_at: Utc.with_ymd_and_hms(2026, 3, 2, 0, 30, 0).unwrap(),
            source: "test".to_string(),
        }
    }

    fn ctx(strategy: Strategy, tolerance: RiskTolerance) -> ScoringContext {
        ScoringContext {
            strategy,
            risk_tolerance: tolerance,
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let q = quote(100.0, 1.2, Some(120.0), Some(80.0));
        let c = ctx(Strategy::Balanced, RiskTolerance::Moderate);

        let a = score_quote(&q, Freshness::Fresh, &c);
        let b = score_quote(&q, Freshness::Fresh, &c);
        assert_eq!(a, b);
    }

    #[test]
    fn momentum_saturates_at_full_scale() {
        assert_eq!(momentum_signal(0.0), 0.5);
        assert_eq!(momentum_signal(MOMENTUM_FULL_SCALE_PCT), 1.0);
        assert_eq!(momentum_signal(-MOMENTUM_FULL_SCALE_PCT), 0.0);
        assert_eq!(momentum_signal(12.0), 1.0);
    }

    #[test]
    fn confidence_never_increases_with_staleness() {
        let q = quote(100.0, 1.0, Some(120.0), Some(80.0));
        let c = ctx(Strategy::Balanced, RiskTolerance::Moderate);

        let fresh = score_quote(&q, Freshness::Fresh, &c).confidence;
        let stale = score_quote(&q, Freshness::Stale, &c).confidence;
        let ancient = score_quote(&q, Freshness::Ancient, &c).confidence;

        assert!(fresh > stale);
        assert!(stale > ancient);
        assert_eq!(fresh, 1.0);
        assert_eq!(stale, STALE_CONFIDENCE_FACTOR);
        assert_eq!(ancient, ANCIENT_CONFIDENCE_FACTOR);
    }

    #[test]
    fn missing_fundamentals_lower_confidence_not_the_price_inputs() {
        let full = quote(100.0, 1.0, Some(120.0), Some(80.0));
        let bare = quote(100.0, 1.0, None, None);
        let c = ctx(Strategy::Balanced, RiskTolerance::Moderate);

        let full_score = score_quote(&full, Freshness::Fresh, &c);
        let bare_score = score_quote(&bare, Freshness::Fresh, &c);

        assert_eq!(bare_score.confidence, MISSING_RANGE_COMPLETENESS_FACTOR);
        assert!(bare_score.confidence < full_score.confidence);
    }

    #[test]
    fn zero_volume_trims_confidence() {
        let mut q = quote(100.0, 1.0, Some(120.0), Some(80.0));
        q.volume = 0;
        let c = ctx(Strategy::Balanced, RiskTolerance::Moderate);

        let score = score_quote(&q, Freshness::Fresh, &c);
        assert_eq!(score.confidence, ZERO_VOLUME_COMPLETENESS_FACTOR);
    }

    #[test]
    fn missing_range_uses_neutral_risk_position() {
        let q = quote(100.0, 0.0, None, None);
        let score = score_quote(&q, Freshness::Fresh, &ctx(Strategy::Balanced, RiskTolerance::Moderate));

        // 0.6 * 0.5 position + 0.4 * 0 volatility.
        assert!((score.risk_score - 0.3).abs() < 1e-12);
        assert_eq!(score.risk_band, RiskBand::Low);
    }

    #[test]
    fn signal_table_boundaries_per_strategy() {
        let cases = [
            (Strategy::Conservative, CONSERVATIVE_SIGNALS),
            (Strategy::Balanced, BALANCED_SIGNALS),
            (Strategy::Growth, GROWTH_SIGNALS),
            (Strategy::Aggressive, AGGRESSIVE_SIGNALS),
        ];

        for (strategy, t) in cases {
            assert_eq!(
                signal_for(strategy, t.strong_buy_composite, t.strong_buy_confidence),
                Signal::StrongBuy,
                "{strategy} strong buy edge"
            );
            // Confidence a hair under the strong-buy bar demotes to Buy.
            assert_eq!(
                signal_for(
                    strategy,
                    t.strong_buy_composite,
                    t.strong_buy_confidence - 0.01
                ),
                Signal::Buy,
                "{strategy} demotion edge"
            );
            assert_eq!(
                signal_for(strategy, t.buy_composite, t.buy_confidence),
                Signal::Buy,
                "{strategy} buy edge"
            );
            assert_eq!(
                signal_for(strategy, t.buy_composite - 0.01, 1.0),
                Signal::Hold,
                "{strategy} hold edge"
            );
            assert_eq!(
                signal_for(strategy, 1.0, t.buy_confidence - 0.01),
                Signal::Hold,
                "{strategy} low-confidence hold edge"
            );
        }
    }

    #[test]
    fn predicted_return_applies_both_multipliers() {
        // change 2%, headroom 10% => base 0.5*2 + 20*0.1 = 3.0
        let q = quote(100.0, 2.0, Some(110.0), Some(80.0));

        let cautious_strategy = score_quote(
            &q,
            Freshness::Fresh,
            &ctx(Strategy::Conservative, RiskTolerance::Moderate),
        );
        assert_eq!(cautious_strategy.predicted_return_pct, 2.1); // 3.0 * 0.7

        let cautious_tolerance = score_quote(
            &q,
            Freshness::Fresh,
            &ctx(Strategy::Balanced, RiskTolerance::VeryLow),
        );
        assert_eq!(cautious_tolerance.predicted_return_pct, 1.5); // 3.0 * 0.5

        let bold = score_quote(
            &q,
            Freshness::Fresh,
            &ctx(Strategy::Aggressive, RiskTolerance::VeryHigh),
        );
        assert_eq!(bold.predicted_return_pct, 6.8); // 3.0 * 1.5 * 1.5
    }

    #[test]
    fn momentum_heavy_quotes_rank_higher_under_aggressive() {
        // Near the high and surging: momentum/growth tilted.
        let q = quote(118.0, 4.0, Some(125.0), Some(60.0));

        let conservative = score_quote(
            &q,
            Freshness::Fresh,
            &ctx(Strategy::Conservative, RiskTolerance::Moderate),
        );
        let aggressive = score_quote(
            &q,
            Freshness::Fresh,
            &ctx(Strategy::Aggressive, RiskTolerance::Moderate),
        );

        assert!(aggressive.composite_value > conservative.composite_value);
    }

    #[test]
    fn growth_signal_scales_headroom_by_period_return() {
        // 20% headroom, +5% day: 0.8 * 1.05 = 0.84.
        let rising = quote(100.0, 5.0, Some(120.0), Some(80.0));
        assert!((growth_signal(&rising) - 0.84).abs() < 1e-12);

        // Same headroom, -5% day: 0.8 * 0.95 = 0.76.
        let falling = quote(100.0, -5.0, Some(120.0), Some(80.0));
        assert!((growth_signal(&falling) - 0.76).abs() < 1e-12);

        assert_eq!(growth_signal(&quote(100.0, 0.0, None, None)), NEUTRAL_SIGNAL);
    }
}
