use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advisor_core::domain::constraints::ConstraintSet;
use advisor_core::domain::instrument::Universe;
use advisor_core::domain::portfolio::Portfolio;
use advisor_core::enrich::anthropic::AnthropicClient;
use advisor_core::enrich::NarrativeClient;
use advisor_core::error::PipelineError;
use advisor_core::market::provider::{HttpQuoteProvider, QuoteProvider};
use advisor_core::market::synthetic::SyntheticQuoteProvider;
use advisor_core::pipeline::{MarketOverview, PipelineConfig, RecommendationPipeline};

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

    let provider: Arc<dyn QuoteProvider> = match HttpQuoteProvider::from_settings(&settings) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(
                error = %e,
                "quote provider unconfigured; starting API with synthetic quotes"
            );
            Arc::new(SyntheticQuoteProvider::default())
        }
    };

    let narrative: Option<Arc<dyn NarrativeClient>> = match AnthropicClient::from_settings(
        &settings,
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "narrative client unavailable; portfolios ship without commentary");
            None
        }
    };

    let pipeline = Arc::new(RecommendationPipeline::with_default_caches(
        provider,
        narrative,
        Universe::asx_default(),
        PipelineConfig::from_env(),
    ));
    let state = AppState { pipeline };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/stocks", get(get_stocks))
        .route(
            "/api/v1/recommendations/generate",
            post(generate_recommendation),
        )
        .route("/api/v1/recommendations/sample", get(sample_recommendation))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RecommendationPipeline>,
}

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidConstraints { .. }
            | PipelineError::InsufficientCapital { .. }
            | PipelineError::NoEligibleInstruments { .. } => StatusCode::BAD_REQUEST,
            PipelineError::AllSourcesUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::EnrichmentUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });

        if status.is_server_error() {
            let err = anyhow::Error::new(self.0);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "request failed");
        }

        (status, Json(body)).into_response()
    }
}

async fn get_stocks(State(state): State<AppState>) -> Result<Json<MarketOverview>, ApiError> {
    let overview = state.pipeline.market_overview().await?;
    Ok(Json(overview))
}

async fn generate_recommendation(
    State(state): State<AppState>,
    Json(constraints): Json<ConstraintSet>,
) -> Result<Json<Portfolio>, ApiError> {
    let portfolio = state.pipeline.recommend(&constraints).await?;
    Ok(Json(portfolio))
}

async fn sample_recommendation(State(state): State<AppState>) -> Result<Json<Portfolio>, ApiError> {
    let portfolio = state.pipeline.recommend(&ConstraintSet::default()).await?;
    Ok(Json(portfolio))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
