use crate::domain::quote::Quote;
use crate::error::FetchError;
use crate::market::provider::QuoteProvider;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_QUOTE_TTL_SECS: u64 = 300;
pub const DEFAULT_ENRICHMENT_TTL_SECS: u64 = 1_800;

// Entries older than this are usable only as a last resort.
const ANCIENT_AGE_SECS: i64 = 3_600;

/// Age classification of a cache entry relative to the request's `as_of`
/// instant. Drives the confidence freshness factor in scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    Ancient,
}

impl Freshness {
    fn from_age(age_secs: i64, ttl_secs: i64) -> Self {
        let age = age_secs.max(0);
        if age <= ttl_secs {
            Self::Fresh
        } else if age <= ANCIENT_AGE_SECS {
            Self::Stale
        } else {
            Self::Ancient
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Concurrent TTL memo map. Entry age is judged against a caller-supplied
/// instant rather than a wall-clock read, so one request sees one consistent
/// notion of freshness and tests can pin time.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl_secs: i64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    pub fn insert(&self, key: &str, value: V, stored_at: DateTime<Utc>) {
        self.entries
            .insert(key.to_string(), Entry { value, stored_at });
    }

    /// Entry within TTL, or `None`.
    pub fn get_fresh(&self, key: &str, as_of: DateTime<Utc>) -> Option<V> {
        let entry = self.entries.get(key)?;
        let age = (as_of - entry.stored_at).num_seconds();
        if Freshness::from_age(age, self.ttl_secs) == Freshness::Fresh {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Any stored entry regardless of age, annotated with its freshness.
    pub fn get_with_freshness(&self, key: &str, as_of: DateTime<Utc>) -> Option<(V, Freshness)> {
        let entry = self.entries.get(key)?;
        let age = (as_of - entry.stored_at).num_seconds();
        Some((entry.value.clone(), Freshness::from_age(age, self.ttl_secs)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A quote together with how fresh the cache judged it at serve time.
#[derive(Debug, Clone, Serialize)]
pub struct CachedQuote {
    pub quote: Quote,
    pub freshness: Freshness,
}

/// Quote namespace of the market data cache: TTL memoization over a
/// provider, stale-serve on fetch failure, per-symbol request coalescing.
/// Constructed once and injected into the pipeline, never global.
#[derive(Debug)]
pub struct QuoteCache {
    cache: TtlCache<Quote>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl QuoteCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            inflight: DashMap::new(),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(DEFAULT_QUOTE_TTL_SECS))
    }

    /// Serve the symbol's quote, fetching through `provider` only when the
    /// cached entry is missing or expired.
    ///
    /// On fetch failure an expired entry is still served, annotated Stale or
    /// Ancient so scoring lowers its confidence. With no entry at all the
    /// failure propagates and the symbol drops out of the pass.
    pub async fn get_or_fetch(
        &self,
        provider: &dyn QuoteProvider,
        symbol: &str,
        as_of: DateTime<Utc>,
    ) -> Result<CachedQuote, FetchError> {
        if let Some(quote) = self.cache.get_fresh(symbol, as_of) {
            return Ok(CachedQuote {
                quote,
                freshness: Freshness::Fresh,
            });
        }

        // One fetch per symbol at a time. The shard guard must not be held
        // across an await, hence the scoped clone.
        let gate = {
            let entry = self
                .inflight
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };
        let _guard = gate.lock().await;

        // A coalesced caller may have refreshed the entry while we waited.
        if let Some(quote) = self.cache.get_fresh(symbol, as_of) {
            return Ok(CachedQuote {
                quote,
                freshness: Freshness::Fresh,
            });
        }

        match provider.fetch_quote(symbol).await {
            Ok(quote) => {
                self.cache.insert(symbol, quote.clone(), quote.fetched_at);
                Ok(CachedQuote {
                    quote,
                    freshness: Freshness::Fresh,
                })
            }
            Err(err) => {
                if let Some((quote, freshness)) = self.cache.get_with_freshness(symbol, as_of) {
                    tracing::warn!(
                        symbol,
                        ?freshness,
                        error = %err,
                        "quote fetch failed; serving expired cache entry"
                    );
                    return Ok(CachedQuote { quote, freshness });
                }
                Err(err)
            }
        }
    }
}
