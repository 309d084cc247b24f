use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use crate::{
    error::{ApiResult, AppError},
    middleware::AuthUser,
    models::Profile,
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/profile", get(get_profile).patch(update_profile))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 8, max = 72, message = "password must be 8 to 72 characters"))]
    pub password: String,
    #[validate(length(max = 120))]
    pub full_name: Option<String>,
    #[validate(length(min = 8, max = 16))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 120))]
    pub full_name: Option<String>,
    #[validate(length(min = 8, max = 16))]
    pub phone_number: Option<String>,
}

async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("password hash task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// POST /api/auth/register
async fn register(State(state): State<Arc<AppState>>, Json(req): Json<RegisterRequest>) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let email = req.email.trim().to_lowercase();
    let password_hash = hash_password(req.password).await?;

    let profile = Profile::create(
        &state.db.pool,
        &email,
        &password_hash,
        req.full_name.as_deref().map(str::trim),
        req.phone_number.as_deref().map(str::trim),
    )
    .await?
    .ok_or_else(|| AppError::Conflict("an account with this email already exists".to_string()))?;

    info!("Registered profile {} ({})", profile.id, profile.email);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "profile": profile }))))
}

/// GET /api/profile
async fn get_profile(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<impl IntoResponse> {
    let profile = Profile::find_by_id(&state.db.pool, user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("profile not found".to_string()))?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

/// PATCH /api/profile
async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let profile = Profile::update_contact(
        &state.db.pool,
        user.user_id,
        req.full_name.as_deref().map(str::trim),
        req.phone_number.as_deref().map(str::trim),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("profile not found".to_string()))?;

    // full_name лежит в кеше авторизации
    state.cache.invalidate_user_auth(&user.email).await;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_validation() {
        let ok = RegisterRequest {
            email: "amina@example.cm".to_string(),
            password: "long-enough".to_string(),
            full_name: Some("Amina Njoya".to_string()),
            phone_number: None,
        };
        assert!(ok.validate().is_ok());

        let short_password = RegisterRequest {
            password: "short".to_string(),
            ..ok
        };
        assert!(short_password.validate().is_err());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            password: "long-enough".to_string(),
            full_name: None,
            phone_number: None,
        };
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn profile_update_validation() {
        let empty = UpdateProfileRequest {
            full_name: None,
            phone_number: None,
        };
        assert!(empty.validate().is_ok());

        let short_phone = UpdateProfileRequest {
            full_name: None,
            phone_number: Some("670".to_string()),
        };
        assert!(short_phone.validate().is_err());
    }
}
