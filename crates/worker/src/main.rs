use advisor_core::domain::constraints::{ConstraintSet, RiskTolerance, Strategy};
use advisor_core::domain::instrument::Universe;
use advisor_core::enrich::anthropic::AnthropicClient;
use advisor_core::enrich::NarrativeClient;
use advisor_core::market::provider::{HttpQuoteProvider, QuoteProvider};
use advisor_core::market::synthetic::SyntheticQuoteProvider;
use advisor_core::pipeline::{PipelineConfig, RecommendationPipeline};
use advisor_core::time::asx_market;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "advisor_worker")]
struct Args {
    /// Total capital to allocate, in dollars.
    #[arg(long, default_value_t = 1000.0)]
    capital: f64,

    /// Risk tolerance: very_low, low, moderate, high or very_high.
    #[arg(long, default_value = "moderate")]
    risk_tolerance: RiskTolerance,

    /// Strategy: conservative, balanced, growth or aggressive.
    #[arg(long, default_value = "balanced")]
    strategy: Strategy,

    /// Desired minimum number of positions (advisory).
    #[arg(long, default_value_t = 3)]
    min_diversification: usize,

    /// Cap on any single position as a fraction of capital, in (0, 1].
    #[arg(long, default_value_t = 0.30)]
    max_single_stock_fraction: f64,

    /// Run against deterministic synthetic quotes instead of the live
    /// provider. No narrative enrichment.
    #[arg(long)]
    synthetic: bool,

    /// Print the scored market overview instead of building a portfolio.
    #[arg(long)]
    overview: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = advisor_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let now = chrono::Utc::now();
    tracing::info!(
        market_open = asx_market::is_market_open(now),
        synthetic = args.synthetic,
        "advisor worker starting"
    );

    let (provider, narrative): (Arc<dyn QuoteProvider>, Option<Arc<dyn NarrativeClient>>) =
        if args.synthetic {
            (Arc::new(SyntheticQuoteProvider::default()), None)
        } else {
            let provider = Arc::new(HttpQuoteProvider::from_settings(&settings)?);
            let narrative: Option<Arc<dyn NarrativeClient>> =
                match AnthropicClient::from_settings(&settings) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        tracing::warn!(error = %e, "narrative client unavailable; running numeric-only");
                        None
                    }
                };
            (provider, narrative)
        };

    let pipeline = RecommendationPipeline::with_default_caches(
        provider,
        narrative,
        Universe::asx_default(),
        PipelineConfig::from_env(),
    );

    if args.overview {
        let overview = match pipeline.market_overview().await {
            Ok(overview) => overview,
            Err(err) => {
                let err = anyhow::Error::new(err);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "market overview failed");
                return Err(err);
            }
        };
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    let constraints = ConstraintSet {
        total_capital: args.capital,
        risk_tolerance: args.risk_tolerance,
        strategy: args.strategy,
        min_diversification: args.min_diversification,
        max_single_stock_fraction: args.max_single_stock_fraction,
    };

    let portfolio = match pipeline.recommend(&constraints).await {
        Ok(portfolio) => portfolio,
        Err(err) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "recommendation run failed");
            return Err(err);
        }
    };

    println!("{}", serde_json::to_string_pretty(&portfolio)?);
    tracing::info!(
        recommendation_id = %portfolio.recommendation_id,
        positions = portfolio.allocations.len(),
        total_investment = portfolio.total_investment,
        "recommendation run complete"
    );

    Ok(())
}

fn init_sentry(settings: &advisor_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
