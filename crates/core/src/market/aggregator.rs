use crate::error::FetchError;
use crate::market::cache::{CachedQuote, QuoteCache};
use crate::market::provider::QuoteProvider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at, Instant};

pub const DEFAULT_FETCH_POOL_SIZE: usize = 20;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BATCH_DEADLINE_SECS: u64 = 30;

/// One symbol that produced no quote this pass.
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub symbol: String,
    pub reason: String,
}

impl From<FetchError> for FetchFailure {
    fn from(err: FetchError) -> Self {
        Self {
            symbol: err.symbol,
            reason: err.reason,
        }
    }
}

/// Best-effort result of one aggregation pass. Quotes are keyed by symbol in
/// a BTreeMap so downstream iteration order never depends on task completion
/// order.
#[derive(Debug, Default)]
pub struct MarketSnapshot {
    pub quotes: BTreeMap<String, CachedQuote>,
    pub failures: Vec<FetchFailure>,
}

impl MarketSnapshot {
    pub fn failed_symbols(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.symbol.clone()).collect()
    }
}

/// Concurrency budget for one aggregation pass.
#[derive(Debug, Clone, Copy)]
pub struct FetchPlan {
    /// Worker pool size; fetches beyond this wait on the semaphore.
    pub pool_size: usize,
    /// Per-symbol budget, on top of the provider's own client timeout.
    pub fetch_timeout: Duration,
    /// Wall-clock budget for the whole batch. Fetches still in flight at
    /// the deadline are aborted and reported as failures.
    pub batch_deadline: Duration,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_FETCH_POOL_SIZE,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            batch_deadline: Duration::from_secs(DEFAULT_BATCH_DEADLINE_SECS),
        }
    }
}

/// Fan out cache-backed quote fetches for `symbols` over a bounded worker
/// pool and collect whatever settled. Single-symbol failures never fail the
/// batch; an empty result is the caller's signal that every source is down.
///
/// Quotes cached before an abort remain valid for later requests.
pub async fn fetch_universe(
    provider: Arc<dyn QuoteProvider>,
    cache: Arc<QuoteCache>,
    symbols: &[String],
    as_of: DateTime<Utc>,
    plan: FetchPlan,
) -> MarketSnapshot {
    let semaphore = Arc::new(Semaphore::new(plan.pool_size.max(1)));
    let deadline = Instant::now() + plan.batch_deadline;

    let mut handles = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let provider = Arc::clone(&provider);
        let cache = Arc::clone(&cache);
        let semaphore = Arc::clone(&semaphore);
        let fetch_timeout = plan.fetch_timeout;
        let task_symbol = symbol.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| FetchError::new(&task_symbol, "fetch pool closed"))?;

            match timeout(
                fetch_timeout,
                cache.get_or_fetch(provider.as_ref(), &task_symbol, as_of),
            )
            .await
            {
                Ok(res) => res,
                Err(_) => Err(FetchError::new(
                    &task_symbol,
                    format!("fetch timed out after {fetch_timeout:?}"),
                )),
            }
        });

        handles.push((symbol.clone(), handle));
    }

    let mut snapshot = MarketSnapshot::default();
    for (symbol, mut handle) in handles {
        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(cached))) => {
                snapshot.quotes.insert(symbol, cached);
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    symbol = %err.symbol,
                    reason = %err.reason,
                    "symbol dropped from this pass"
                );
                snapshot.failures.push(FetchFailure::from(err));
            }
            Ok(Err(join_err)) => {
                tracing::error!(%symbol, error = %join_err, "quote fetch task failed");
                snapshot.failures.push(FetchFailure {
                    symbol,
                    reason: format!("task failure: {join_err}"),
                });
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(%symbol, "batch deadline exceeded; aborting in-flight fetch");
                snapshot.failures.push(FetchFailure {
                    symbol,
                    reason: "batch deadline exceeded".to_string(),
                });
            }
        }
    }

    tracing::info!(
        fetched = snapshot.quotes.len(),
        failed = snapshot.failures.len(),
        "market snapshot assembled"
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quote::Quote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        failing_symbols: Vec<&'static str>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failing_symbols: Vec<&'static str>) -> Self {
            Self {
                failing_symbols,
                delay: Duration::from_millis(10),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl QuoteProvider for FlakyProvider {
        fn provider_name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_symbols.contains(&symbol) {
                return Err(FetchError::new(symbol, "source offline"));
            }
            Ok(Quote {
                symbol: symbol.to_string(),
                current_price: 10.0,
                daily_change_pct: 0.5,
                volume: 1_000,
                fifty_two_week_high: Some(12.0),
                fifty_two_week_low: Some(8.0),
                fetched_at: Utc::now(),
                source: "flaky".to_string(),
            })
        }
    }

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_batch() {
        let provider = Arc::new(FlakyProvider::new(vec!["BAD.AX"]));
        let cache = Arc::new(QuoteCache::with_default_ttl());
        let universe = symbols(&["A.AX", "B.AX", "BAD.AX", "C.AX", "D.AX"]);

        let snapshot = fetch_universe(
            provider,
            cache,
            &universe,
            Utc::now(),
            FetchPlan::default(),
        )
        .await;

        assert_eq!(snapshot.quotes.len(), 4);
        assert_eq!(snapshot.failures.len(), 1);
        assert_eq!(snapshot.failures[0].symbol, "BAD.AX");
        assert!(!snapshot.quotes.contains_key("BAD.AX"));
    }

    #[tokio::test]
    async fn total_failure_yields_empty_quotes() {
        let provider = Arc::new(FlakyProvider::new(vec!["A.AX", "B.AX", "C.AX"]));
        let cache = Arc::new(QuoteCache::with_default_ttl());
        let universe = symbols(&["A.AX", "B.AX", "C.AX"]);

        let snapshot = fetch_universe(
            provider,
            cache,
            &universe,
            Utc::now(),
            FetchPlan::default(),
        )
        .await;

        assert!(snapshot.quotes.is_empty());
        assert_eq!(snapshot.failed_symbols(), vec!["A.AX", "B.AX", "C.AX"]);
    }

    #[tokio::test]
    async fn pool_bound_is_respected() {
        let provider = Arc::new(FlakyProvider::new(vec![]));
        let cache = Arc::new(QuoteCache::with_default_ttl());
        let universe: Vec<String> = (0..12).map(|i| format!("S{i:02}.AX")).collect();

        let plan = FetchPlan {
            pool_size: 3,
            ..FetchPlan::default()
        };
        let snapshot = fetch_universe(
            Arc::clone(&provider) as Arc<dyn QuoteProvider>,
            cache,
            &universe,
            Utc::now(),
            plan,
        )
        .await;

        assert_eq!(snapshot.quotes.len(), 12);
        assert!(
            provider.max_in_flight() <= 3,
            "observed {} concurrent fetches",
            provider.max_in_flight()
        );
    }

    #[tokio::test]
    async fn batch_deadline_aborts_stragglers() {
        let mut provider = FlakyProvider::new(vec![]);
        provider.delay = Duration::from_millis(300);
        let provider = Arc::new(provider);
        let cache = Arc::new(QuoteCache::with_default_ttl());
        let universe = symbols(&["A.AX", "B.AX", "C.AX"]);

        let plan = FetchPlan {
            pool_size: 2,
            fetch_timeout: Duration::from_secs(5),
            batch_deadline: Duration::from_millis(50),
        };
        let snapshot = fetch_universe(provider, cache, &universe, Utc::now(), plan).await;

        assert!(snapshot.quotes.is_empty());
        assert_eq!(snapshot.failures.len(), 3);
        assert!(snapshot.failures[0].reason.contains("deadline"));
    }

    #[tokio::test]
    async fn quotes_come_back_in_symbol_order() {
        let provider = Arc::new(FlakyProvider::new(vec![]));
        let cache = Arc::new(QuoteCache::with_default_ttl());
        let universe = symbols(&["Z.AX", "A.AX", "M.AX"]);

        let snapshot = fetch_universe(
            provider,
            cache,
            &universe,
            Utc::now(),
            FetchPlan::default(),
        )
        .await;

        let keys: Vec<_> = snapshot.quotes.keys().cloned().collect();
        assert_eq!(keys, vec!["A.AX", "M.AX", "Z.AX"]);
    }
}
