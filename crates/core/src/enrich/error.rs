use crate::enrich::Provider;
use serde_json::Value;
use std::fmt;

/// Narrative model failure that keeps the raw reply around, so a bad run can
/// be diagnosed from logs without replaying the request.
#[derive(Debug, Clone)]
pub struct NarrativeModelError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for NarrativeModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "narrative model error (provider={:?}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for NarrativeModelError {}
