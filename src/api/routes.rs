//! API route handlers.
//!
//! All endpoints return JSON. Every handler talks to the table through a
//! cloned `TableHandle`; no handler touches game state directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::engine::{TableHandle, TableSnapshot};
use crate::types::{RoundError, RoundOutcome, Side};

pub type AppState = TableHandle;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SideRequest {
    pub side: Side,
}

#[derive(Debug, Deserialize)]
pub struct BetRequest {
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

/// `RoundError` mapped onto HTTP.
pub struct ApiError(pub RoundError);

impl From<RoundError> for ApiError {
    fn from(err: RoundError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            RoundError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance")
            }
            RoundError::NoSideSelected => (StatusCode::UNPROCESSABLE_ENTITY, "no_side_selected"),
            RoundError::RoundInProgress => (StatusCode::CONFLICT, "round_in_progress"),
            RoundError::Settlement(_) => (StatusCode::BAD_GATEWAY, "settlement_failed"),
            RoundError::TableClosed => (StatusCode::SERVICE_UNAVAILABLE, "table_closed"),
        };

        let body = ErrorResponse {
            error: self.0.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// GET /api/state
pub async fn get_state(State(table): State<AppState>) -> ApiResult<TableSnapshot> {
    Ok(Json(table.snapshot().await?))
}

/// POST /api/side
pub async fn select_side(
    State(table): State<AppState>,
    Json(req): Json<SideRequest>,
) -> ApiResult<TableSnapshot> {
    table.select_side(req.side).await?;
    Ok(Json(table.snapshot().await?))
}

/// POST /api/bet
pub async fn set_bet(
    State(table): State<AppState>,
    Json(req): Json<BetRequest>,
) -> ApiResult<TableSnapshot> {
    table.set_bet(req.amount).await?;
    Ok(Json(table.snapshot().await?))
}

/// POST /api/flip
///
/// Responds once the round has settled.
pub async fn flip(State(table): State<AppState>) -> ApiResult<RoundOutcome> {
    Ok(Json(table.flip_and_settle().await?))
}

/// POST /api/reset
pub async fn reset(State(table): State<AppState>) -> ApiResult<TableSnapshot> {
    table.reset_round().await?;
    Ok(Json(table.snapshot().await?))
}
