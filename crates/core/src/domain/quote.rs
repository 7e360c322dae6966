use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time market observation for one symbol. Owned by the quote
/// cache and replaced wholesale on refetch, never mutated in place.
///
/// Sources do not guarantee `low <= current_price <= high`; consumers must
/// clamp. Missing 52-week bounds mean the source has no fundamentals for the
/// symbol, which lowers scoring confidence downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub current_price: f64,
    /// Percent change over the trailing session, e.g. -1.25 for -1.25%.
    pub daily_change_pct: f64,
    pub volume: u64,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    /// Label of the adapter that produced this quote.
    pub source: String,
}

impl Quote {
    /// Position of the current price inside the 52-week range, clamped to
    /// [0, 1]. `None` when either bound is missing or the range is
    /// degenerate (high <= low).
    pub fn range_position(&self) -> Option<f64> {
        let high = self.fifty_two_week_high?;
        let low = self.fifty_two_week_low?;
        if high <= low {
            return None;
        }
        Some(((self.current_price - low) / (high - low)).clamp(0.0, 1.0))
    }

    /// Distance to the 52-week high as a fraction of the current price,
    /// floored at zero. `None` when the high or the price is unusable.
    pub fn headroom_fraction(&self) -> Option<f64> {
        let high = self.fifty_two_week_high?;
        if self.current_price <= 0.0 {
            return None;
        }
        Some(((high - self.current_price) / self.current_price).max(0.0))
    }

    pub fn has_full_range(&self) -> bool {
        self.range_position().is_some()
    }
}
