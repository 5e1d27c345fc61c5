use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::{holding_queries, user_queries};
use crate::errors::AppError;
use crate::models::Holding;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/holdings", post(upsert_holding))
        .route("/holdings/symbols/all", get(all_symbols))
        .route("/holdings/:user_id", get(list_holdings))
        .route("/holdings/:user_id/:symbol", delete(delete_holding))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertHoldingRequest {
    user_id: String,
    symbol: String,
    name: Option<String>,
    allocation: Option<f64>,
    note: Option<String>,
}

async fn list_holdings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Holding>>, AppError> {
    let holdings = holding_queries::get_holdings(&state.pool, &user_id).await?;
    Ok(Json(holdings))
}

async fn upsert_holding(
    State(state): State<AppState>,
    Json(req): Json<UpsertHoldingRequest>,
) -> Result<Json<Holding>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }
    // Symbols are normalized server-side; AAPL and aapl are one holding.
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AppError::Validation("symbol is required".to_string()));
    }

    if user_queries::get_user(&state.pool, req.user_id.trim())
        .await?
        .is_none()
    {
        return Err(AppError::NotFound);
    }

    let holding = holding_queries::upsert_holding(
        &state.pool,
        req.user_id.trim(),
        &symbol,
        req.name.as_deref(),
        req.allocation,
        req.note.as_deref(),
    )
    .await?;

    Ok(Json(holding))
}

async fn delete_holding(
    State(state): State<AppState>,
    Path((user_id, symbol)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let symbol = symbol.trim().to_uppercase();
    let deleted = holding_queries::delete_holding(&state.pool, &user_id, &symbol).await?;
    if !deleted {
        return Err(AppError::NotFound);
    }

    Ok(Json(json!({ "success": true })))
}

async fn all_symbols(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let symbols = holding_queries::all_symbols(&state.pool).await?;
    Ok(Json(symbols))
}
