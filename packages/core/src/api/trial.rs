//! Trial endpoints.
//!
//! Routes:
//! - `GET  /trial/status?user_id=` : resolved status plus `hasAccess`
//! - `GET  /trial/access?user_id=` : access flag only
//! - `GET  /trial/stats`           : counts per lifecycle state
//! - `POST /trial`                 : start a trial
//! - `POST /trial/:user_id/cancel` : cancel the active trial
//! - `POST /trial/:user_id/convert`: convert the active trial to paid
//!
//! Status lookups never fail towards the client: a store failure resolves
//! to "no trial" (see [`TrialResolver::get_trial_status`]).
//!
//! [`TrialResolver::get_trial_status`]: crate::trial::TrialResolver::get_trial_status

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::error::AppError;
use crate::trial::{NewTrial, TrialDetails, TrialStats, TrialStatus};

// ---- Request / response shapes ----

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatusResponse {
    #[serde(flatten)]
    pub status: TrialStatus,
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialAccessResponse {
    pub user_id: String,
    pub has_access: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTrialResponse {
    pub user_id: String,
    pub trial: TrialDetails,
}

fn require_user_id(user_id: Option<String>) -> Result<String, AppError> {
    user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("user_id is required".to_string()))
}

// ---- Handlers ----

/// `GET /trial/status?user_id=...`
pub async fn trial_status(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user_id(query.user_id)?;
    let status = state.resolver.get_trial_status(&user_id).await;
    let has_access = status.has_access();

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(TrialStatusResponse { status, has_access }),
    ))
}

/// `GET /trial/access?user_id=...`
pub async fn trial_access(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = require_user_id(query.user_id)?;
    let has_access = state.resolver.has_access(&user_id).await;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(TrialAccessResponse { user_id, has_access }),
    ))
}

/// `GET /trial/stats`
pub async fn trial_stats(State(state): State<ApiState>) -> Result<Json<TrialStats>, AppError> {
    Ok(Json(state.manager.stats().await?))
}

/// `POST /trial`: body `{ "user_id": "...", "lead_id": "...", "english_level": "..." }`.
pub async fn start_trial(
    State(state): State<ApiState>,
    Json(body): Json<NewTrial>,
) -> Result<(StatusCode, Json<StartTrialResponse>), AppError> {
    let record = state.manager.start_trial(body).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartTrialResponse {
            trial: TrialDetails::from(&record),
            user_id: record.user_id,
        }),
    ))
}

/// `POST /trial/:user_id/cancel`
pub async fn cancel_trial(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = require_user_id(Some(user_id))?;
    if state.manager.cancel_trial(&user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(no_active_trial(&user_id))
    }
}

/// `POST /trial/:user_id/convert`
pub async fn convert_trial(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = require_user_id(Some(user_id))?;
    if state.manager.convert_trial(&user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(no_active_trial(&user_id))
    }
}

fn no_active_trial(user_id: &str) -> AppError {
    AppError::NotFound(format!("No active trial for user {}", user_id))
}
