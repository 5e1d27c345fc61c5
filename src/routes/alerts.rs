use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::alert_queries;
use crate::errors::AppError;
use crate::models::AlertLog;
use crate::state::AppState;

const DEFAULT_ALERT_LIMIT: i64 = 20;
const MAX_ALERT_LIMIT: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/alerts/:user_id", get(recent_alerts))
        .route("/alerts/:user_id/count/today", get(count_today))
}

#[derive(Debug, Deserialize)]
struct LimitParam {
    limit: Option<i64>,
}

async fn recent_alerts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitParam>,
) -> Result<Json<Vec<AlertLog>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);

    let alerts = alert_queries::recent_alerts(&state.pool, &user_id, limit).await?;
    Ok(Json(alerts))
}

async fn count_today(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = alert_queries::count_today(&state.pool, &user_id).await?;
    Ok(Json(json!({ "count": count })))
}
