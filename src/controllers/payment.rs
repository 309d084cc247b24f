use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    error::{ApiResult, AppError},
    middleware::AuthUser,
    models::{Booking, PaymentStatus},
    services::{
        booking::release_booking_in_tx,
        payment::{
            self, normalize_phone, ChargeOutcome, ChargeRequest, ClaimOutcome, MobileMoneyOperator, PaymentError,
        },
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings/{id}/payment", post(initiate_payment))
        .route("/bookings/{id}/payment-status", get(get_payment_status))
        .route("/webhook/payment", post(payment_webhook))
}

// --- Request/Response структуры ---
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub method: MobileMoneyOperator,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub payment_id: String,
    pub status: String,
}

#[derive(Debug, serde::Serialize, FromRow)]
struct TransactionView {
    transaction_id: String,
    operator: String,
    phone: String,
    amount: i64,
    status: String,
    created_at: DateTime<Utc>,
}

async fn owned_booking(state: &AppState, booking_id: i64, user_id: i64) -> Result<Booking, AppError> {
    Booking::find_for_user(&state.db.pool, booking_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("booking not found".to_string()))
}

/// Declined charges cancel the booking so its seats go back on sale.
async fn fail_booking(state: &AppState, booking_id: i64) -> Result<(), AppError> {
    let mut tx = state.db.pool.begin().await?;
    let released = release_booking_in_tx(&mut tx, booking_id, Some(PaymentStatus::Failed)).await?;
    tx.commit().await?;

    if let Some((trip_id, seats)) = released {
        state.cache.release_seats(trip_id, &seats).await;
        state.cache.invalidate_trip_seats(trip_id).await;
    }
    Ok(())
}

// --- HTTP Handlers ---

/// POST /api/bookings/{id}/payment
async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
    Json(req): Json<InitiatePaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let phone = normalize_phone(&req.phone)
        .ok_or_else(|| AppError::BadRequest("a valid mobile money number is required".to_string()))?;

    let booking = owned_booking(&state, booking_id, user.user_id).await?;

    // Заявка на оплату фиксируется до обращения к провайдеру
    let claim = match payment::claim_payment(&state.db.pool, booking.id, user.user_id, req.method, &phone).await? {
        ClaimOutcome::Claimed(claim) => claim,
        ClaimOutcome::NotPayable => {
            return Err(AppError::Conflict("booking is not awaiting payment".to_string()));
        }
        ClaimOutcome::InFlight => {
            return Err(AppError::Conflict("a payment for this booking is already in progress".to_string()));
        }
    };

    let request = ChargeRequest {
        order_id: booking.reference.to_string(),
        amount: claim.amount,
        phone: phone.clone(),
        operator: req.method,
        description: format!("Bus ticket, {} seat(s)", booking.seat_numbers.len()),
    };

    let outcome = match state.payments.charge(&request).await {
        Ok(outcome) => outcome,
        Err(e) if e.charge_not_taken() => {
            if let Err(db_err) = payment::abandon_claim(&state.db.pool, &claim).await {
                error!("Failed to close payment claim {} for booking {}: {}", claim.id, booking.id, db_err);
            }
            if let PaymentError::Declined(reason) = &e {
                warn!("Payment for booking {} declined: {}", booking.id, reason);
                fail_booking(&state, booking.id).await?;
            }
            return Err(e.into());
        }
        Err(e) => {
            // Провайдер мог списать деньги: заявка остаётся до webhook или очистки
            warn!(
                "Outcome of charge for booking {} unknown, claim {} kept pending: {}",
                booking.id, claim.id, e
            );
            return Err(e.into());
        }
    };

    if let Err(e) = payment::attach_provider_reference(&state.db.pool, &claim, outcome.transaction_id()).await {
        error!(
            "Charge {} for booking {} accepted by provider but not recorded on claim {} ({}): {}",
            outcome.transaction_id(),
            booking.id,
            claim.id,
            claim.placeholder_id,
            e
        );
        return Err(e.into());
    }

    let status = match &outcome {
        ChargeOutcome::Confirmed { transaction_id } => {
            payment::settle_success(&state, transaction_id).await?;
            PaymentStatus::Completed
        }
        ChargeOutcome::Pending { .. } => PaymentStatus::Pending,
    };

    info!(
        "Payment {} for booking {} via {}: {}",
        outcome.transaction_id(),
        booking.id,
        req.method.as_str(),
        status
    );

    Ok(Json(json!({
        "success": true,
        "payment_id": outcome.transaction_id(),
        "status": status,
        "amount": claim.amount,
        "phone": phone,
    })))
}

/// POST /api/webhook/payment
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentWebhook>,
) -> ApiResult<impl IntoResponse> {
    if payload.payment_id.trim().is_empty() {
        return Err(AppError::BadRequest("paymentId is required".to_string()));
    }
    payment::process_webhook(&state, &payload.payment_id, &payload.status).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/bookings/{id}/payment-status
async fn get_payment_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let booking = owned_booking(&state, booking_id, user.user_id).await?;

    let transaction = sqlx::query_as::<_, TransactionView>(
        "SELECT transaction_id, operator, phone, amount, status, created_at
         FROM payment_transactions
         WHERE booking_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )
    .bind(booking.id)
    .fetch_optional(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "booking_id": booking.id,
        "payment_status": booking.payment_status,
        "payment_method": booking.payment_method,
        "booking_status": booking.booking_status,
        "total_amount": booking.total_amount,
        "transaction": transaction,
    })))
}
