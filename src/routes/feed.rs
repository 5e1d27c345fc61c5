use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::db::{holding_queries, user_queries};
use crate::errors::AppError;
use crate::models::{HoldingRef, UserSettings};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/feed/:user_id", get(build_feed))
}

/// Run the personalization pipeline for one user and return the themed feed.
async fn build_feed(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = user_queries::get_user(&state.pool, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let holdings = holding_queries::get_holdings(&state.pool, &user_id).await?;
    let settings = UserSettings {
        user_id: user.user_id.clone(),
        user_name: user.name.clone(),
        holdings: holdings
            .into_iter()
            .map(|h| HoldingRef {
                symbol: h.symbol,
                name: h.name,
            })
            .collect(),
        frequency: user.frequency(),
        sensitivity: user.sensitivity(),
        weekly_summary: user.weekly_summary,
        mode: user.mode(),
    };

    let cancel = CancellationToken::new();
    let (themes, diagnostics) = state.pipeline.run(&settings, &cancel).await?;

    Ok(Json(json!({
        "themes": themes,
        "diagnostics": diagnostics,
    })))
}
