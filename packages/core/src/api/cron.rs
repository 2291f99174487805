//! Maintenance endpoints for an external scheduler.
//!
//! Both routes require `Authorization: Bearer <CRON_SECRET_TOKEN>`. When no
//! token is configured they refuse to run at all.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use super::ApiState;
use crate::error::AppError;

pub async fn require_cron_token(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .cron_token
        .as_deref()
        .ok_or_else(|| AppError::Config("CRON_SECRET_TOKEN is not configured".to_string()))?;

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let authorized = match provided {
        None => {
            return Err(AppError::Unauthorized(
                "Bearer authorization token required".to_string(),
            ))
        }
        Some(token) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
    };

    if !authorized {
        tracing::warn!("Rejected cron request with invalid token");
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }

    Ok(next.run(req).await)
}

/// Compare two byte strings in time independent of where they differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `POST /cron/expire-trials`
pub async fn expire_trials(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let expired = state.manager.expire_trials().await?;

    Ok(Json(json!({
        "success": true,
        "expiredCount": expired,
        "timestamp": Utc::now(),
    })))
}

/// `POST /cron/process-expiring`
pub async fn process_expiring(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let sweep = state.manager.process_expiring_trials().await?;

    Ok(Json(json!({
        "success": true,
        "considered": sweep.considered,
        "scheduled": sweep.scheduled,
        "timestamp": Utc::now(),
    })))
}
