use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{Profile, UserRole},
    AppState,
};

/// Authenticated customer, resolved from `Authorization: Basic email:password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
}

/// Authenticated user whose profile carries the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

/// Splits a Basic credentials header into `(email, password)`.
pub fn parse_basic_credentials(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (email, password) = credentials.split_once(':')?;
    if email.is_empty() || password.is_empty() {
        return None;
    }
    Some((email.to_string(), password.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, AppError> {
    // bcrypt blocks, run it on the blocking pool
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AppError::Internal(format!("password check task failed: {}", e)))
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        let (email, password) = parse_basic_credentials(header_value).ok_or(AppError::Unauthorized)?;

        // Сначала пробуем кеш
        if let Some(user) = state.cache.get_cached_auth_user(&email, &password).await {
            return Ok(user);
        }

        let profile = Profile::find_by_email(&state.db.pool, &email)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !verify_password(password.clone(), profile.password_hash.clone()).await? {
            tracing::debug!("rejected credentials for {}", email);
            return Err(AppError::Unauthorized);
        }

        let user = AuthUser {
            user_id: profile.id,
            role: profile.role(),
            email: profile.email,
            full_name: profile.full_name,
        };

        state.cache.cache_auth_user(&email, &password, &user).await;
        Ok(user)
    }
}

/// Anonymous requests pass as `None`; bad credentials are still rejected.
impl OptionalFromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(None);
        }
        <AuthUser as FromRequestParts<Arc<AppState>>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user = <AuthUser as FromRequestParts<Arc<AppState>>>::from_request_parts(parts, state).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::Forbidden("Administrator access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
