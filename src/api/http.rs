// HTTP boundary: thin axum handlers over QueryFacade

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::facade::{Health, QueryFacade, Status};
use crate::engine::types::{Alert, EnrichedTrade};
use crate::errors::QueryError;
use crate::market_data::adapters::SnapshotMap;
use crate::store::history::{DEFAULT_ALERT_CAPACITY, DEFAULT_TRADE_CAPACITY};

type AppState = Arc<QueryFacade>;

pub fn router(facade: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/market-data", get(market_data))
        .route("/trades", get(trades))
        .route("/alerts", get(alerts))
        .route("/config/risk_threshold", post(set_risk_threshold))
        .route("/toggle-mock", post(toggle_mock))
        .route("/test-nse", get(test_nse))
        .fallback(not_found)
        .with_state(facade)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Structured error body: `{"success": false, "code": ..., "error": ...}`.
#[derive(Debug)]
pub struct ApiError(QueryError);

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            QueryError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            QueryError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
        };
        let body = json!({ "success": false, "code": self.0.code(), "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SymbolQuery {
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    pub threshold: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct MockBody {
    pub use_mock: Option<bool>,
}

async fn health(State(f): State<AppState>) -> Json<Health> {
    Json(f.health())
}

async fn status(State(f): State<AppState>) -> Json<Status> {
    Json(f.status())
}

async fn market_data(
    State(f): State<AppState>,
    q: Result<Query<SymbolQuery>, QueryRejection>,
) -> Result<Json<SnapshotMap>, ApiError> {
    let Query(q) = q.map_err(|e| QueryError::UnknownSymbol(e.body_text()))?;
    Ok(Json(f.latest_snapshot(q.symbol.as_deref())?))
}

// recent trades/alerts never fail: a bad `limit` falls back to the default
fn limit_or(q: Result<Query<LimitQuery>, QueryRejection>, default: usize) -> usize {
    match q {
        Ok(Query(q)) => q.limit.unwrap_or(default),
        Err(e) => {
            warn!(error = %e, default, "Ignoring malformed limit");
            default
        }
    }
}

async fn trades(
    State(f): State<AppState>,
    q: Result<Query<LimitQuery>, QueryRejection>,
) -> Json<Vec<Arc<EnrichedTrade>>> {
    Json(f.recent_trades(limit_or(q, DEFAULT_TRADE_CAPACITY)))
}

async fn alerts(State(f): State<AppState>, q: Result<Query<LimitQuery>, QueryRejection>) -> Json<Vec<Alert>> {
    Json(f.recent_alerts(limit_or(q, DEFAULT_ALERT_CAPACITY)))
}

async fn set_risk_threshold(
    State(f): State<AppState>,
    body: Result<Json<ThresholdBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = body.map_err(|e| {
        warn!(error = %e, "Rejected threshold update body");
        QueryError::InvalidConfig(e.body_text())
    })?;
    let threshold = f.set_risk_threshold(body.threshold)?;
    Ok(Json(json!({ "success": true, "new_threshold": threshold })))
}

/// An empty body (or `null`, or no `use_mock` key) flips the mode; anything
/// that is not a valid `MockBody` is rejected without touching the config.
fn parse_mock_body(body: &[u8]) -> Result<Option<bool>, QueryError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: Option<MockBody> = serde_json::from_slice(body)
        .map_err(|e| QueryError::InvalidConfig(format!("invalid toggle body: {e}")))?;
    Ok(parsed.and_then(|b| b.use_mock))
}

async fn toggle_mock(State(f): State<AppState>, body: Bytes) -> Result<Json<serde_json::Value>, ApiError> {
    let requested = parse_mock_body(&body).inspect_err(|e| warn!(error = %e, "Rejected mock toggle body"))?;
    let mode = f.set_mock_mode(requested);
    let message = if mode { "Mock data mode enabled" } else { "Mock data mode disabled" };
    Ok(Json(json!({ "success": true, "message": message, "mock_mode": mode })))
}

async fn test_nse(State(f): State<AppState>) -> Json<serde_json::Value> {
    let check = f.check_live_source().await;
    let message = if check.success() {
        format!("{} check successful, {}/{} symbols working", check.source, check.working, check.symbols.len())
    } else {
        format!("{} check failed, no symbols working", check.source)
    };
    Json(json!({ "success": check.success(), "message": message, "data": check.symbols }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "success": false, "error": "Endpoint not found" })))
}
