pub mod allocation;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod market;
pub mod pipeline;
pub mod scoring;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub quote_provider_base_url: Option<String>,
        pub quote_provider_api_key: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                quote_provider_base_url: std::env::var("QUOTE_PROVIDER_BASE_URL").ok(),
                quote_provider_api_key: std::env::var("QUOTE_PROVIDER_API_KEY").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn require_quote_provider_base_url(&self) -> anyhow::Result<&str> {
            self.quote_provider_base_url
                .as_deref()
                .context("QUOTE_PROVIDER_BASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }
}
