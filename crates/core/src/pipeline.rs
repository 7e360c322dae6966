//! End-to-end recommendation pipeline: fetch the universe through the quote
//! cache, score whatever settled, build the portfolio, then try to enrich it
//! with a narrative. Enrichment is best-effort; a narrative failure never
//! changes or delays the numeric result.

use crate::domain::constraints::{ConstraintSet, RiskTolerance, Strategy};
use crate::domain::instrument::Universe;
use crate::domain::portfolio::Portfolio;
use crate::domain::quote::Quote;
use crate::domain::score::Score;
use crate::enrich::{EnrichmentCache, NarrativeClient, NarrativeInput};
use crate::error::PipelineError;
use crate::market::aggregator::{self, FetchFailure, FetchPlan};
use crate::market::cache::{self, Freshness, QuoteCache};
use crate::market::provider::QuoteProvider;
use crate::scoring::{score_quote, ScoringContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_ENRICHMENT_TIMEOUT_SECS: u64 = 20;

/// Tunables for one pipeline instance. Every knob has an env override so
/// deployments can tighten budgets without a rebuild.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub quote_ttl: Duration,
    pub enrichment_ttl: Duration,
    pub fetch_pool_size: usize,
    pub fetch_timeout: Duration,
    /// Wall-clock budget for the market-data stage of one request.
    pub request_deadline: Duration,
    pub enrichment_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(cache::DEFAULT_QUOTE_TTL_SECS),
            enrichment_ttl: Duration::from_secs(cache::DEFAULT_ENRICHMENT_TTL_SECS),
            fetch_pool_size: aggregator::DEFAULT_FETCH_POOL_SIZE,
            fetch_timeout: Duration::from_secs(aggregator::DEFAULT_FETCH_TIMEOUT_SECS),
            request_deadline: Duration::from_secs(aggregator::DEFAULT_BATCH_DEADLINE_SECS),
            enrichment_timeout: Duration::from_secs(DEFAULT_ENRICHMENT_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let quote_ttl = std::env::var("QUOTE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.quote_ttl);
        let enrichment_ttl = std::env::var("ENRICHMENT_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.enrichment_ttl);
        let fetch_pool_size = std::env::var("FETCH_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.fetch_pool_size);
        let fetch_timeout = std::env::var("QUOTE_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);
        let request_deadline = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_deadline);
        let enrichment_timeout = std::env::var("ENRICHMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.enrichment_timeout);

        Self {
            quote_ttl,
            enrichment_ttl,
            fetch_pool_size,
            fetch_timeout,
            request_deadline,
            enrichment_timeout,
        }
    }

    fn fetch_plan(&self) -> FetchPlan {
        FetchPlan {
            pool_size: self.fetch_pool_size,
            fetch_timeout: self.fetch_timeout,
            batch_deadline: self.request_deadline,
        }
    }
}

/// One instrument's slice of the market overview.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentView {
    pub name: String,
    pub sector: String,
    pub quote: Quote,
    pub freshness: Freshness,
    pub score: Score,
}

/// Universe-wide snapshot scored under neutral defaults, for the read-only
/// stocks endpoint.
#[derive(Debug, Serialize)]
pub struct MarketOverview {
    pub as_of: DateTime<Utc>,
    pub instruments: BTreeMap<String, InstrumentView>,
    pub failures: Vec<FetchFailure>,
}

/// Owns the provider, both cache namespaces, and the optional narrative
/// client. Everything is injected; nothing global.
pub struct RecommendationPipeline {
    provider: Arc<dyn QuoteProvider>,
    narrative: Option<Arc<dyn NarrativeClient>>,
    quote_cache: Arc<QuoteCache>,
    enrichment_cache: Arc<EnrichmentCache>,
    universe: Universe,
    config: PipelineConfig,
}

impl RecommendationPipeline {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        narrative: Option<Arc<dyn NarrativeClient>>,
        quote_cache: Arc<QuoteCache>,
        enrichment_cache: Arc<EnrichmentCache>,
        universe: Universe,
        config: PipelineConfig,
    ) -> Self {
        Self {
            provider,
            narrative,
            quote_cache,
            enrichment_cache,
            universe,
            config,
        }
    }

    /// Standard wiring: both cache namespaces built from the config TTLs.
    pub fn with_default_caches(
        provider: Arc<dyn QuoteProvider>,
        narrative: Option<Arc<dyn NarrativeClient>>,
        universe: Universe,
        config: PipelineConfig,
    ) -> Self {
        let quote_cache = Arc::new(QuoteCache::new(config.quote_ttl));
        let enrichment_cache = Arc::new(EnrichmentCache::new(config.enrichment_ttl));
        Self::new(
            provider,
            narrative,
            quote_cache,
            enrichment_cache,
            universe,
            config,
        )
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Run the full pipeline for one constraint set.
    pub async fn recommend(&self, constraints: &ConstraintSet) -> Result<Portfolio, PipelineError> {
        constraints.validate()?;

        let as_of = Utc::now();
        let symbols = self.universe.symbols();
        let snapshot = aggregator::fetch_universe(
            Arc::clone(&self.provider),
            Arc::clone(&self.quote_cache),
            &symbols,
            as_of,
            self.config.fetch_plan(),
        )
        .await;

        if snapshot.quotes.is_empty() {
            return Err(PipelineError::AllSourcesUnavailable {
                failed: snapshot.failed_symbols(),
            });
        }

        let ctx = ScoringContext {
            strategy: constraints.strategy,
            risk_tolerance: constraints.risk_tolerance,
        };
        let scores: BTreeMap<String, Score> = snapshot
            .quotes
            .iter()
            .map(|(symbol, cached)| {
                (
                    symbol.clone(),
                    score_quote(&cached.quote, cached.freshness, &ctx),
                )
            })
            .collect();

        let mut portfolio = crate::allocation::build_portfolio(
            Uuid::new_v4(),
            as_of,
            &scores,
            &snapshot.quotes,
            &self.universe,
            constraints,
        )?;

        if !snapshot.failures.is_empty() {
            portfolio.warnings.push(format!(
                "Quotes unavailable for {} instrument(s): {}.",
                snapshot.failures.len(),
                snapshot.failed_symbols().join(", ")
            ));
        }

        self.attach_narrative(&mut portfolio, constraints, as_of)
            .await;

        tracing::info!(
            recommendation_id = %portfolio.recommendation_id,
            tier = %portfolio.tier,
            positions = portfolio.allocations.len(),
            total_investment = portfolio.total_investment,
            enriched = portfolio.narrative.is_some(),
            "recommendation generated"
        );
        Ok(portfolio)
    }

    /// Score the whole universe under neutral defaults without building a
    /// portfolio.
    pub async fn market_overview(&self) -> Result<MarketOverview, PipelineError> {
        let as_of = Utc::now();
        let symbols = self.universe.symbols();
        let snapshot = aggregator::fetch_universe(
            Arc::clone(&self.provider),
            Arc::clone(&self.quote_cache),
            &symbols,
            as_of,
            self.config.fetch_plan(),
        )
        .await;

        if snapshot.quotes.is_empty() {
            return Err(PipelineError::AllSourcesUnavailable {
                failed: snapshot.failed_symbols(),
            });
        }

        let ctx = ScoringContext {
            strategy: Strategy::Balanced,
            risk_tolerance: RiskTolerance::Moderate,
        };
        let mut instruments = BTreeMap::new();
        for (symbol, cached) in &snapshot.quotes {
            let Some(instrument) = self.universe.get(symbol) else {
                continue;
            };
            instruments.insert(
                symbol.clone(),
                InstrumentView {
                    name: instrument.name.clone(),
                    sector: instrument.sector.clone(),
                    quote: cached.quote.clone(),
                    freshness: cached.freshness,
                    score: score_quote(&cached.quote, cached.freshness, &ctx),
                },
            );
        }

        Ok(MarketOverview {
            as_of,
            instruments,
            failures: snapshot.failures,
        })
    }

    /// Attach a narrative if a client is wired and responds in budget. Any
    /// failure downgrades to a warning log; the portfolio ships as-is.
    async fn attach_narrative(
        &self,
        portfolio: &mut Portfolio,
        constraints: &ConstraintSet,
        as_of: DateTime<Utc>,
    ) {
        let Some(client) = &self.narrative else {
            return;
        };

        let input = NarrativeInput::from_portfolio(portfolio, constraints);
        let key = input.fingerprint();
        if let Some(narrative) = self.enrichment_cache.get_fresh(&key, as_of) {
            tracing::debug!(%key, "narrative served from cache");
            portfolio.narrative = Some(narrative);
            return;
        }

        match tokio::time::timeout(
            self.config.enrichment_timeout,
            client.narrate_portfolio(input),
        )
        .await
        {
            Ok(Ok(narrative)) => {
                self.enrichment_cache.insert(&key, narrative.clone(), as_of);
                portfolio.narrative = Some(narrative);
            }
            Ok(Err(err)) => {
                let err = PipelineError::EnrichmentUnavailable {
                    detail: format!("{err:#}"),
                };
                tracing::warn!(kind = err.kind(), error = %err, "portfolio ships without narrative");
            }
            Err(_) => {
                let err = PipelineError::EnrichmentUnavailable {
                    detail: format!(
                        "narrative client timed out after {:?}",
                        self.config.enrichment_timeout
                    ),
                };
                tracing::warn!(kind = err.kind(), error = %err, "portfolio ships without narrative");
            }
        }
    }
}
