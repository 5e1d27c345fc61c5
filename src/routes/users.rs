use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::user_queries;
use crate::errors::AppError;
use crate::models::{AppUser, Frequency, Mode, Sensitivity};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register_user))
        .route("/users/settings", post(update_settings_by_body))
        .route("/users/:user_id", get(get_user))
        .route("/users/:user_id/push-token", put(update_push_token))
        .route("/users/:user_id/settings", put(update_settings_by_path))
}

// ==============================================================================
// Requests
// ==============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    user_id: String,
    name: Option<String>,
    push_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushTokenRequest {
    push_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    user_id: Option<String>,
    notification_frequency: Option<String>,
    notification_sensitivity: Option<String>,
    weekly_summary: Option<bool>,
    mode: Option<String>,
}

impl SettingsRequest {
    /// Reject values outside the known vocabularies before touching state.
    fn validate(&self) -> Result<(), AppError> {
        if let Some(f) = &self.notification_frequency {
            if Frequency::from_str(f).is_none() {
                return Err(AppError::Validation(format!("unknown frequency: {}", f)));
            }
        }
        if let Some(s) = &self.notification_sensitivity {
            if Sensitivity::from_str(s).is_none() {
                return Err(AppError::Validation(format!("unknown sensitivity: {}", s)));
            }
        }
        if let Some(m) = &self.mode {
            if Mode::from_str(m).is_none() {
                return Err(AppError::Validation(format!("unknown mode: {}", m)));
            }
        }
        Ok(())
    }
}

// ==============================================================================
// Handlers
// ==============================================================================

async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AppUser>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".to_string()));
    }

    let user = user_queries::upsert_user(
        &state.pool,
        req.user_id.trim(),
        req.name.as_deref(),
        req.push_token.as_deref(),
    )
    .await?;

    Ok(Json(user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AppUser>, AppError> {
    let user = user_queries::get_user(&state.pool, &user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(user))
}

async fn update_push_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<PushTokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.push_token.trim().is_empty() {
        return Err(AppError::Validation("pushToken is required".to_string()));
    }

    let updated =
        user_queries::update_push_token(&state.pool, &user_id, req.push_token.trim()).await?;
    if !updated {
        return Err(AppError::NotFound);
    }

    Ok(Json(json!({})))
}

async fn update_settings_by_body(
    State(state): State<AppState>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<AppUser>, AppError> {
    let user_id = req
        .user_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    apply_settings(&state, &user_id, req).await
}

async fn update_settings_by_path(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<AppUser>, AppError> {
    apply_settings(&state, &user_id, req).await
}

async fn apply_settings(
    state: &AppState,
    user_id: &str,
    req: SettingsRequest,
) -> Result<Json<AppUser>, AppError> {
    req.validate()?;

    if user_queries::get_user(&state.pool, user_id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let user = user_queries::update_settings(
        &state.pool,
        user_id,
        req.notification_frequency.as_deref(),
        req.notification_sensitivity.as_deref(),
        req.weekly_summary,
        req.mode.as_deref(),
    )
    .await?;

    Ok(Json(user))
}
