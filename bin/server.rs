// Account Merge Engine - Web Server
// REST API with Axum over the same SQLite store the CLI uses

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_merge::{
    audit_entries_for_target, get_merge_ledger, resolve_caller, setup_database, AccountMergeEngine,
    AuditEntry, CallerContext, EngineConfig, FindDuplicatesRequest, FindDuplicatesResponse,
    MergeError, MergeLedger, MergeRequest, MergeResult,
};
use account_merge::auth::{authorize_role, READ_ROLE};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    engine: Arc<AccountMergeEngine>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError(MergeError::Internal("database lock poisoned".to_string())))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

/// Engine error rendered as an HTTP response
struct ApiError(MergeError);

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = Json(serde_json::json!({
            "success": false,
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authenticate(conn: &Connection, headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    Ok(resolve_caller(conn, bearer_token(headers))?)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/duplicates/find - Search for duplicate accounts
async fn find_duplicates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FindDuplicatesRequest>,
) -> Result<Json<ApiResponse<FindDuplicatesResponse>>, ApiError> {
    let conn = state.conn()?;
    let caller = authenticate(&conn, &headers)?;
    let response = state.engine.find_duplicates(&conn, &caller, &request)?;
    Ok(Json(ApiResponse::ok(response)))
}

/// POST /api/accounts/merge - Merge secondary into primary
///
/// 200 even on partial failure; callers inspect `data.success`.
async fn merge_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MergeRequest>,
) -> Result<Json<ApiResponse<MergeResult>>, ApiError> {
    let conn = state.conn()?;
    let caller = authenticate(&conn, &headers)?;
    let result = state.engine.merge_accounts(&conn, &caller, &request)?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/audit/:account_id - Audit trail for an account
async fn get_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<AuditEntry>>>, ApiError> {
    let conn = state.conn()?;
    let caller = authenticate(&conn, &headers)?;
    authorize_role(&conn, &caller, READ_ROLE, "read_audit", &account_id)?;
    let entries = audit_entries_for_target(&conn, &account_id)?;
    Ok(Json(ApiResponse::ok(entries)))
}

/// GET /api/merges/:merge_id - Stored transfer ledger
async fn get_merge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(merge_id): Path<String>,
) -> Result<Json<ApiResponse<MergeLedger>>, ApiError> {
    let conn = state.conn()?;
    let caller = authenticate(&conn, &headers)?;
    authorize_role(&conn, &caller, READ_ROLE, "read_merge_ledger", &merge_id)?;
    let ledger = get_merge_ledger(&conn, &merge_id)?
        .ok_or_else(|| MergeError::NotFound(format!("merge {} not found", merge_id)))?;
    Ok(Json(ApiResponse::ok(ledger)))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_merge=info,merge_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var_os(account_merge::config::CONFIG_ENV_VAR).map(std::path::PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))?;
    setup_database(&conn).context("Failed to initialize database")?;
    info!("Database opened: {:?}", config.database_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        engine: Arc::new(AccountMergeEngine::new(&config)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/duplicates/find", post(find_duplicates))
        .route("/accounts/merge", post(merge_accounts))
        .route("/audit/:account_id", get(get_audit))
        .route("/merges/:merge_id", get(get_merge))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
