//! charta-api - HTTP API server for charta

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use charta_core::Settings;
use charta_db::{run_migrations, Database, FilesystemStore};

use handlers::notes::{
    create_note, delete_note, download_note, get_note, get_note_structured, list_notes,
    upload_note,
};
use handlers::patients::{
    create_patient, delete_patient, get_patient, list_patients, update_patient,
};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging incidents without exposing any record data.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    /// Blob store for uploaded note files.
    pub store: Arc<FilesystemStore>,
    pub settings: Arc<Settings>,
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Database(charta_core::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    ServiceUnavailable(String),
}

impl From<charta_core::Error> for ApiError {
    fn from(err: charta_core::Error) -> Self {
        use charta_core::Error;
        match &err {
            Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            Error::PatientNotFound(_) | Error::NoteNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            Error::Validation(_) | Error::Cursor(_) | Error::InvalidInput(_) => {
                ApiError::BadRequest(err.to_string())
            }
            Error::Conflict(msg) => ApiError::Conflict(msg.clone()),
            Error::Storage(msg) => ApiError::ServiceUnavailable(msg.clone()),
            _ => ApiError::Database(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// CORS
// =============================================================================

/// Parse allowed CORS origins from CORS_ALLOWED_ORIGINS (comma-separated).
/// Defaults to localhost dev origins.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let raw = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());
    raw.split(',')
        .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
        .collect()
}

// =============================================================================
// HEALTH CHECK
// =============================================================================

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    // A health probe that does not touch the database would report a
    // healthy service that cannot serve a single request.
    sqlx::query("SELECT 1")
        .execute(&state.db.pool)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(format!("database unreachable: {}", e)))?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

// =============================================================================
// MAIN
// =============================================================================

fn init_tracing() {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "charta_api=debug,charta_db=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer();
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }
}

fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.settings.max_upload_bytes as usize + 64 * 1024;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Patients
        .route("/api/v1/patients", post(create_patient).get(list_patients))
        .route(
            "/api/v1/patients/:id",
            get(get_patient)
                .patch(update_patient)
                .delete(delete_patient),
        )
        // Notes
        .route(
            "/api/v1/patients/:id/notes",
            post(create_note).get(list_notes),
        )
        .route("/api/v1/patients/:id/notes/upload", post(upload_note))
        .route(
            "/api/v1/patients/:id/notes/:note_id",
            get(get_note).delete(delete_note),
        )
        .route(
            "/api/v1/patients/:id/notes/:note_id/structured",
            get(get_note_structured),
        )
        .route(
            "/api/v1/patients/:id/notes/:note_id/download",
            get(download_note),
        )
        // Middleware
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .max_age(std::time::Duration::from_secs(3600)),
        )
        // Multipart framing overhead on top of the configured upload cap;
        // the upload handler enforces the exact per-file limit.
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let settings = Settings::from_env()?;

    // Database: pool + migrations
    let pool = charta_db::create_pool(&settings.database_url).await?;
    run_migrations(&pool).await?;
    let db = Database::with_mrn_config(
        pool,
        settings.mrn_prefix.clone(),
        settings.mrn_auto_generate,
    );

    // Blob store: fail fast if the storage directory is unusable
    let store = FilesystemStore::new(&settings.storage_base_path);
    store
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("storage validation failed: {}", e))?;
    info!(
        subsystem = "api",
        component = "startup",
        storage_path = %settings.storage_base_path,
        "Blob storage validated"
    );

    let addr: SocketAddr = settings.bind_addr.parse()?;
    let state = AppState {
        db: Arc::new(db),
        store: Arc::new(store),
        settings: Arc::new(settings),
    };

    let app = build_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
