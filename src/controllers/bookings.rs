use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiResult,
    middleware::AuthUser,
    services::booking::{self, CreateBookingRequest},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips/{id}/bookings", post(create_booking))
        .route("/bookings", get(get_user_bookings))
        .route("/bookings/{id}/cancel", post(cancel_booking))
}

/* ---------- BOOKINGS ---------- */

// POST /api/trips/{id}/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(trip_id): Path<i64>,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let booking = booking::create_booking(&state, &user, trip_id, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking })),
    ))
}

// GET /api/bookings
async fn get_user_bookings(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<impl IntoResponse> {
    let history = booking::trip_history(&state, user.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "upcoming": history.upcoming,
        "past": history.past,
    })))
}

// POST /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = booking::cancel_booking(&state, user.user_id, booking_id).await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}
