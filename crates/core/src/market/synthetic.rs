use crate::domain::quote::Quote;
use crate::error::FetchError;
use crate::market::provider::QuoteProvider;
use chrono::Utc;

const DEFAULT_SEED: u64 = 17;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Reference prices for the covered ASX listings, used as the anchor for
/// generated quotes.
const ASX_REFERENCE_PRICES: &[(&str, f64)] = &[
    ("ALL.AX", 48.50),
    ("ANZ.AX", 29.20),
    ("BHP.AX", 44.20),
    ("CBA.AX", 118.50),
    ("CSL.AX", 285.00),
    ("FMG.AX", 19.80),
    ("MQG.AX", 210.00),
    ("NAB.AX", 37.80),
    ("RIO.AX", 118.00),
    ("STO.AX", 7.20),
    ("TLS.AX", 3.95),
    ("WBC.AX", 28.50),
    ("WDS.AX", 25.80),
    ("WES.AX", 73.50),
    ("WOW.AX", 31.20),
];

/// Deterministic pseudo-quote generator for demo runs and tests. The same
/// symbol and seed always produce the same market figures. Never wired into
/// production configurations; real deployments use [`HttpQuoteProvider`]
/// and treat missing fundamentals as reduced confidence instead of
/// fabricating them.
///
/// [`HttpQuoteProvider`]: crate::market::provider::HttpQuoteProvider
#[derive(Debug, Clone)]
pub struct SyntheticQuoteProvider {
    seed: u64,
}

impl SyntheticQuoteProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn reference_price(symbol: &str) -> Option<f64> {
        ASX_REFERENCE_PRICES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, p)| *p)
    }

    fn generate(&self, symbol: &str) -> Quote {
        let h = fnv1a64(self.seed, symbol.as_bytes());

        // Unknown symbols get a hash-derived anchor in $5.00..$405.00.
        let base_price = Self::reference_price(symbol)
            .unwrap_or_else(|| 5.0 + (h % 40_000) as f64 / 100.0);

        let daily_change_pct = ((h >> 8) % 601) as f64 / 100.0 - 3.0;
        let volume = 250_000 + (h >> 16) % 4_750_000;
        let high_premium = 0.05 + ((h >> 24) % 2_501) as f64 / 10_000.0;
        let low_discount = 0.05 + ((h >> 40) % 2_501) as f64 / 10_000.0;

        Quote {
            symbol: symbol.to_string(),
            current_price: round2(base_price),
            daily_change_pct: round2(daily_change_pct),
            volume,
            fifty_two_week_high: Some(round2(base_price * (1.0 + high_premium))),
            fifty_two_week_low: Some(round2(base_price * (1.0 - low_discount))),
            fetched_at: Utc::now(),
            source: "synthetic".to_string(),
        }
    }
}

impl Default for SyntheticQuoteProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

#[async_trait::async_trait]
impl QuoteProvider for SyntheticQuoteProvider {
    fn provider_name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        Ok(self.generate(symbol))
    }
}

fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in seed.to_le_bytes().iter().chain(bytes) {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
