use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

// Fixed AEST. Sydney runs AEDT (UTC+11) October-April, so during those
// months this window trails the exchange by one hour.
const AEST_OFFSET_SECS: i32 = 10 * 3600;

// ASX continuous trading session, local time.
const OPEN_HOUR_AEST: u32 = 10;
const CLOSE_HOUR_AEST: u32 = 16;

/// Whether the ASX continuous session is plausibly open at `now_utc`.
/// Used for log annotations only; quotes are served regardless.
pub fn is_market_open(now_utc: DateTime<Utc>) -> bool {
    let Some(aest) = chrono::FixedOffset::east_opt(AEST_OFFSET_SECS) else {
        return false;
    };
    let now_local = now_utc.with_timezone(&aest);
    let date = now_local.date_naive();

    if is_weekend(date) || configured_holidays().contains(&date) {
        return false;
    }

    (OPEN_HOUR_AEST..CLOSE_HOUR_AEST).contains(&now_local.hour())
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date ASX public holidays only; movable ones (Easter, King's
    // Birthday) go in ASX_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    let years = [2024, 2025, 2026, 2027, 2028, 2029, 2030];
    for y in years {
        for (m, d) in [(1, 1), (1, 26), (4, 25), (12, 25), (12, 26)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("ASX_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }

    out
}
