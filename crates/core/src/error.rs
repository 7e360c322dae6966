use thiserror::Error;

/// Failure to obtain a quote for a single symbol. Non-fatal: the symbol is
/// served stale or dropped from the pass, never the whole batch.
#[derive(Debug, Clone, Error)]
#[error("quote fetch failed for {symbol}: {reason}")]
pub struct FetchError {
    pub symbol: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every symbol in the universe failed to produce a quote, cached or live.
    #[error("all quote sources unavailable: {} symbols failed", failed.len())]
    AllSourcesUnavailable { failed: Vec<String> },

    #[error("insufficient capital ${total_capital:.2}: {detail}")]
    InsufficientCapital { total_capital: f64, detail: String },

    #[error("no eligible instruments among {candidates} scored candidates: {detail}")]
    NoEligibleInstruments { candidates: usize, detail: String },

    #[error("invalid constraints: {detail}")]
    InvalidConstraints { detail: String },

    /// Narrative stage failure. Recovered inside the pipeline; callers only
    /// ever observe it through logs and a missing narrative.
    #[error("narrative enrichment unavailable: {detail}")]
    EnrichmentUnavailable { detail: String },
}

impl PipelineError {
    /// Stable machine-readable tag, used as the `error` field of API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AllSourcesUnavailable { .. } => "all_sources_unavailable",
            Self::InsufficientCapital { .. } => "insufficient_capital",
            Self::NoEligibleInstruments { .. } => "no_eligible_instruments",
            Self::InvalidConstraints { .. } => "invalid_constraints",
            Self::EnrichmentUnavailable { .. } => "enrichment_unavailable",
        }
    }
}
