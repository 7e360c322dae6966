use crate::config::Settings;
use crate::domain::quote::Quote;
use crate::error::FetchError;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/v1/quotes";

/// Source of live quotes. Stateless: one call fetches one instrument, and a
/// failed call is reported per symbol so the batch can continue.
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, FetchError>;
}

/// Quote adapter for an env-configured JSON endpoint. Does not retry: the
/// cache layer decides whether a failure is served stale or dropped.
#[derive(Debug, Clone)]
pub struct HttpQuoteProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
}

impl HttpQuoteProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_quote_provider_base_url()?.to_string();
        let api_key = settings.quote_provider_api_key.clone();

        let timeout_secs = std::env::var("QUOTE_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let path = std::env::var("QUOTE_PROVIDER_QUOTES_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build quote provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(&self, symbol: &str) -> Result<Quote> {
        let url = self.url();
        let headers = self.headers()?;

        let res = self
            .http
            .get(url)
            .headers(headers)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("quote provider request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read quote provider response")?;

        if !status.is_success() {
            anyhow::bail!("quote provider HTTP {status}: {text}");
        }

        let wire = serde_json::from_str::<QuoteWire>(&text)
            .with_context(|| format!("quote provider response is not valid JSON: {text}"))?;
        wire.into_quote(symbol, self.provider_name())
    }
}

#[async_trait::async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, FetchError> {
        self.fetch_once(symbol)
            .await
            .map_err(|err| FetchError::new(symbol, format!("{err:#}")))
    }
}

/// Tolerant wire shape: only the price is required, everything else has a
/// lenient default so partial payloads still produce a usable quote.
#[derive(Debug, Clone, Deserialize)]
struct QuoteWire {
    price: f64,

    #[serde(default)]
    change_percent: f64,

    #[serde(default)]
    volume: u64,

    #[serde(default)]
    fifty_two_week_high: Option<f64>,

    #[serde(default)]
    fifty_two_week_low: Option<f64>,
}

impl QuoteWire {
    fn into_quote(self, symbol: &str, source: &str) -> Result<Quote> {
        anyhow::ensure!(
            self.price.is_finite() && self.price > 0.0,
            "quote price must be positive (got {})",
            self.price
        );

        Ok(Quote {
            symbol: symbol.to_string(),
            current_price: self.price,
            daily_change_pct: self.change_percent,
            volume: self.volume,
            fifty_two_week_high: self.fifty_two_week_high.filter(|v| v.is_finite()),
            fifty_two_week_low: self.fifty_two_week_low.filter(|v| v.is_finite()),
            fetched_at: Utc::now(),
            source: source.to_string(),
        })
    }
}
