use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cancelrisk_core::error::{ErrorKind, SchemaError, ScoringError};
use cancelrisk_core::schema::RECORD_FIELD;
use cancelrisk_core::scoring::{ScoringResult, ScoringService, TierThresholds};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = cancelrisk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    // Inconsistent artifacts must never serve scores, so there is no degraded mode here.
    let service = match ScoringService::load(&settings.artifact_paths(), settings.scoring_config())
        .context("failed to load scoring artifacts")
    {
        Ok(service) => service,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "refusing to start");
            return Err(e);
        }
    };

    let state = AppState {
        service: Arc::new(service),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/model", get(get_model))
        .route("/score", post(post_score))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

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

#[derive(Debug, Clone)]
struct AppState {
    service: Arc<ScoringService>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    model_version: String,
    model_kind: &'static str,
    trained_at: Option<DateTime<Utc>>,
    encoding_spec_version: String,
    layout_signature: String,
    feature_names: Vec<String>,
    fields: Vec<String>,
    thresholds: TierThresholds,
}

async fn get_model(State(state): State<AppState>) -> Json<ModelInfo> {
    let service = &state.service;
    let model = service.model();
    let encoder = service.encoder();
    Json(ModelInfo {
        model_version: model.version().to_string(),
        model_kind: model.kind_name(),
        trained_at: model.trained_at(),
        encoding_spec_version: encoder.version().to_string(),
        layout_signature: format!("{:#010x}", encoder.layout_signature()),
        feature_names: model.feature_names().to_vec(),
        fields: service
            .registry()
            .field_specs()
            .map(|f| f.name.clone())
            .collect(),
        thresholds: service.config().thresholds,
    })
}

#[derive(Debug, Serialize)]
struct ApiScore {
    request_id: Uuid,
    scored_at: DateTime<Utc>,
    #[serde(flatten)]
    result: ScoringResult,
}

/// Parses the request body here rather than through `Json<Value>`, so malformed JSON
/// gets the same error body as every other input error.
fn parse_record(body: &[u8]) -> Result<serde_json::Value, ScoringError> {
    serde_json::from_slice(body).map_err(|err| {
        SchemaError::InvalidValue {
            field: RECORD_FIELD.to_string(),
            reason: format!("request body is not valid JSON: {err}"),
        }
        .into()
    })
}

async fn post_score(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ApiScore>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("score", %request_id);

    let scored = parse_record(&body).and_then(|record| state.service.score(&record));
    span.in_scope(|| match scored {
        Ok(result) => {
            tracing::info!(
                probability = result.probability,
                tier = result.tier.as_str(),
                "scored booking"
            );
            Ok(Json(ApiScore {
                request_id,
                scored_at: Utc::now(),
                result,
            }))
        }
        Err(error) => Err(ApiError { request_id, error }),
    })
}

#[derive(Debug)]
struct ApiError {
    request_id: Uuid,
    error: ScoringError,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    request_id: Uuid,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status = match kind {
            ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ExplanationUnavailable => StatusCode::NOT_IMPLEMENTED,
        };

        match kind {
            ErrorKind::InvalidInput => {
                tracing::info!(error = %self.error, "rejected booking record")
            }
            _ => {
                let err = anyhow::Error::new(self.error.clone());
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %self.error, "scoring failed");
            }
        }

        let field = match &self.error {
            ScoringError::Schema(e) => Some(e.field().to_string()),
            _ => None,
        };
        let body = ApiErrorBody {
            request_id: self.request_id,
            kind,
            field,
            message: self.error.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(
    settings: &cancelrisk_core::config::Settings,
) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
