//! admin.rs
//!
//! Back-office endpoints, all behind [`AdminUser`].
//!
//! - Dashboard figures: bookings, customers, active buses, revenue, latest
//!   bookings and the busiest routes.
//! - Role changes for user profiles.
//! - Manual booking status changes.
//! - Support ticket queue.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{ApiResult, AppError},
    middleware::AdminUser,
    models::{
        Booking, BookingStatus, PaymentStatus, Profile, SupportTicket, TicketStatus, UserRole,
    },
    services::booking::release_booking_in_tx,
    AppState,
};

/// Маршруты админки
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/dashboard", get(get_dashboard))
        .route("/admin/users/{id}/role", patch(update_user_role))
        .route("/admin/bookings/{id}/status", patch(update_booking_status))
        .route("/admin/support/tickets", get(list_tickets))
        .route("/admin/support/tickets/{id}", patch(update_ticket))
}

// --- Dashboard ---

#[derive(Debug, Serialize, FromRow)]
struct DashboardTotals {
    total_bookings: i64,
    total_users: i64,
    active_buses: i64,
    revenue: i64,
}

#[derive(Debug, Serialize, FromRow)]
struct RecentBooking {
    id: i64,
    reference: Uuid,
    passenger_name: String,
    departure_city: String,
    destination_city: String,
    total_amount: i64,
    payment_status: String,
    booking_status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
struct RouteStat {
    departure_city: String,
    destination_city: String,
    bookings: i64,
}

async fn dashboard_totals(pool: &PgPool) -> sqlx::Result<DashboardTotals> {
    sqlx::query_as::<_, DashboardTotals>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM bookings) AS total_bookings,
            (SELECT COUNT(*) FROM profiles) AS total_users,
            (SELECT COUNT(*) FROM buses WHERE is_active) AS active_buses,
            (SELECT COALESCE(SUM(total_amount), 0)::bigint FROM bookings WHERE payment_status = 'completed') AS revenue
        "#,
    )
    .fetch_one(pool)
    .await
}

async fn recent_bookings(pool: &PgPool) -> sqlx::Result<Vec<RecentBooking>> {
    sqlx::query_as::<_, RecentBooking>(
        r#"
        SELECT bk.id, bk.reference, bk.passenger_name, r.departure_city, r.destination_city,
               bk.total_amount, bk.payment_status, bk.booking_status, bk.created_at
        FROM bookings bk
        JOIN trips t ON t.id = bk.trip_id
        JOIN routes r ON r.id = t.route_id
        ORDER BY bk.created_at DESC, bk.id DESC
        LIMIT 5
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn top_routes(pool: &PgPool) -> sqlx::Result<Vec<RouteStat>> {
    sqlx::query_as::<_, RouteStat>(
        r#"
        SELECT r.departure_city, r.destination_city, COUNT(bk.id) AS bookings
        FROM bookings bk
        JOIN trips t ON t.id = bk.trip_id
        JOIN routes r ON r.id = t.route_id
        WHERE bk.booking_status <> 'cancelled'
        GROUP BY r.id, r.departure_city, r.destination_city
        ORDER BY bookings DESC, r.id
        LIMIT 5
        "#,
    )
    .fetch_all(pool)
    .await
}

/// GET /api/admin/dashboard
async fn get_dashboard(State(state): State<Arc<AppState>>, AdminUser(_admin): AdminUser) -> ApiResult<impl IntoResponse> {
    let pool = &state.db.pool;
    let (totals, recent, routes) = futures::try_join!(dashboard_totals(pool), recent_bookings(pool), top_routes(pool))?;

    Ok(Json(json!({
        "success": true,
        "stats": totals,
        "recent_bookings": recent,
        "top_routes": routes,
    })))
}

// --- Users ---

#[derive(Debug, Deserialize)]
struct RoleUpdate {
    role: UserRole,
}

/// PATCH /api/admin/users/{id}/role
async fn update_user_role(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<i64>,
    Json(req): Json<RoleUpdate>,
) -> ApiResult<impl IntoResponse> {
    if user_id == admin.user_id && req.role != UserRole::Admin {
        return Err(AppError::BadRequest("administrators cannot demote themselves".to_string()));
    }

    let profile = Profile::set_role(&state.db.pool, user_id, req.role)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    // Роль хранится в кеше авторизации
    state.cache.invalidate_user_auth(&profile.email).await;
    info!("Admin {} set role of user {} to {}", admin.user_id, user_id, req.role);

    Ok(Json(json!({ "success": true, "profile": profile })))
}

// --- Bookings ---

#[derive(Debug, Deserialize)]
struct BookingStatusUpdate {
    status: BookingStatus,
}

/// PATCH /api/admin/bookings/{id}/status
///
/// Cancelling goes through the same seat release as a customer cancellation;
/// a cancelled booking cannot be revived.
async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(booking_id): Path<i64>,
    Json(req): Json<BookingStatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    let booking = Booking::find(&state.db.pool, booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("booking not found".to_string()))?;

    if booking.is_cancelled() && req.status != BookingStatus::Cancelled {
        return Err(AppError::Conflict("cancelled bookings cannot be reopened".to_string()));
    }

    match req.status {
        BookingStatus::Cancelled => {
            let mut tx = state.db.pool.begin().await?;
            let payment_status = booking.awaits_payment().then_some(PaymentStatus::Failed);
            let released = release_booking_in_tx(&mut tx, booking_id, payment_status).await?;
            tx.commit().await?;
            if let Some((trip_id, seats)) = released {
                state.cache.release_seats(trip_id, &seats).await;
                state.cache.invalidate_trip_seats(trip_id).await;
            }
        }
        status => {
            sqlx::query("UPDATE bookings SET booking_status = $2, updated_at = NOW() WHERE id = $1")
                .bind(booking_id)
                .bind(status.as_str())
                .execute(&state.db.pool)
                .await?;
        }
    }

    info!("Admin {} set booking {} to {}", admin.user_id, booking_id, req.status);

    let booking = Booking::find(&state.db.pool, booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound("booking not found".to_string()))?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

// --- Support ---

#[derive(Debug, Deserialize)]
struct TicketListQuery {
    status: Option<String>,
}

/// `all` or no value lists every ticket.
fn parse_ticket_filter(raw: Option<&str>) -> Result<Option<TicketStatus>, AppError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(status) => Ok(Some(status.parse()?)),
    }
}

/// GET /api/admin/support/tickets
async fn list_tickets(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(params): Query<TicketListQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = parse_ticket_filter(params.status.as_deref())?;
    let tickets = SupportTicket::list(&state.db.pool, status).await?;
    Ok(Json(json!({
        "success": true,
        "count": tickets.len(),
        "tickets": tickets,
    })))
}

#[derive(Debug, Deserialize)]
struct TicketUpdate {
    status: TicketStatus,
}

/// PATCH /api/admin/support/tickets/{id}
async fn update_ticket(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(ticket_id): Path<i64>,
    Json(req): Json<TicketUpdate>,
) -> ApiResult<impl IntoResponse> {
    if !SupportTicket::set_status(&state.db.pool, ticket_id, req.status).await? {
        return Err(AppError::NotFound("ticket not found".to_string()));
    }
    info!("Admin {} moved ticket {} to {}", admin.user_id, ticket_id, req.status);
    Ok(Json(json!({ "success": true, "ticket_id": ticket_id, "status": req.status })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_filter_accepts_all_and_statuses() {
        assert_eq!(parse_ticket_filter(None).unwrap(), None);
        assert_eq!(parse_ticket_filter(Some("all")).unwrap(), None);
        assert_eq!(
            parse_ticket_filter(Some("in_progress")).unwrap(),
            Some(TicketStatus::InProgress)
        );
        assert!(matches!(parse_ticket_filter(Some("pending")), Err(AppError::BadRequest(_))));
    }
}
