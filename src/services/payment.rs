//! payment.rs
//!
//! Mobile money payments (MTN MoMo, Orange Money) for bookings.
//!
//! 1.  **CircuitBreaker** guards calls to the external provider so a dead
//!     provider is not hammered on every checkout.
//! 2.  **PaymentGatewayClient** sends the charge request, either to the HTTP
//!     provider configured by `PAYMENT_GATEWAY_URL` or to a local simulation
//!     that confirms after a short delay.
//! 3.  **Settlement**: marking transactions and bookings as paid or failed,
//!     for synchronous confirmations, webhooks and the cleanup job alike.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::{CircuitBreakerConfig, PaymentConfig},
    models::{PaymentMethod, PaymentStatus},
    services::booking::release_booking_in_tx,
    AppState,
};

/// Currency code of the FCFA used in Cameroon.
pub const CURRENCY: &str = "XAF";

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused until the timeout elapses.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.timeout_seconds))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the next request may go out; moves Open to HalfOpen once the timeout passed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(self.timeout);
                if elapsed >= self.timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker probe failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider temporarily unavailable")]
    CircuitOpen,
    #[error("payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment provider returned an unexpected response: {0}")]
    Provider(String),
}

impl PaymentError {
    /// Whether the provider certainly did not collect the money.
    pub fn charge_not_taken(&self) -> bool {
        matches!(self, PaymentError::CircuitOpen | PaymentError::Declined(_))
    }
}

/// Mobile money operators offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobileMoneyOperator {
    Mtn,
    Orange,
}

impl MobileMoneyOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            MobileMoneyOperator::Mtn => "mtn",
            MobileMoneyOperator::Orange => "orange",
        }
    }

    pub fn payment_method(&self) -> PaymentMethod {
        match self {
            MobileMoneyOperator::Mtn => PaymentMethod::MtnMomo,
            MobileMoneyOperator::Orange => PaymentMethod::OrangeMoney,
        }
    }
}

/// Normalizes a subscriber number to international form.
///
/// Numbers already starting with `+` are kept; local numbers lose their
/// leading zeros and get the Cameroon prefix `+237`. Spaces, dashes and dots
/// are ignored. Returns `None` for empty or non-numeric input.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.')
        .collect();

    let (international, digits) = match compact.strip_prefix('+') {
        Some(rest) => (true, rest.to_string()),
        None => (false, compact.trim_start_matches('0').to_string()),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    if international {
        Some(format!("+{}", digits))
    } else {
        Some(format!("+237{}", digits))
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: String,
    pub amount: i64,
    pub phone: String,
    pub operator: MobileMoneyOperator,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Money collected.
    Confirmed { transaction_id: String },
    /// Customer still has to approve on the handset; the webhook settles it.
    Pending { transaction_id: String },
}

impl ChargeOutcome {
    pub fn transaction_id(&self) -> &str {
        match self {
            ChargeOutcome::Confirmed { transaction_id } | ChargeOutcome::Pending { transaction_id } => {
                transaction_id
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderChargeRequest<'a> {
    merchant_id: &'a str,
    token: String,
    order_id: &'a str,
    amount: i64,
    currency: &'a str,
    operator: &'a str,
    phone: &'a str,
    description: &'a str,
    notification_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderChargeResponse {
    success: bool,
    transaction_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
enum GatewayMode {
    Simulated { delay: Duration },
    Http { base_url: String, http: reqwest::Client },
}

/// Client for the mobile money provider; cheap to clone, the breaker is shared.
#[derive(Debug, Clone)]
pub struct PaymentGatewayClient {
    mode: GatewayMode,
    merchant_id: String,
    secret: String,
    webhook_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn from_config(payment: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Result<Self, PaymentError> {
        let mode = match &payment.gateway_url {
            Some(url) => GatewayMode::Http {
                base_url: url.trim_end_matches('/').to_string(),
                http: reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(30))
                    .build()?,
            },
            None => GatewayMode::Simulated {
                delay: Duration::from_millis(payment.simulated_delay_ms),
            },
        };

        Ok(Self {
            mode,
            merchant_id: payment.merchant_id.clone(),
            secret: payment.merchant_secret.clone(),
            webhook_url: payment.webhook_url.clone(),
            circuit_breaker: Arc::new(CircuitBreaker::from_config(breaker)),
        })
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.mode, GatewayMode::Simulated { .. })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// SHA-256 over amount, currency, order, secret and merchant.
    fn request_token(&self, amount: i64, order_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}{}{}{}", amount, CURRENCY, order_id, self.secret, self.merchant_id).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Sends the charge request to the customer's handset.
    pub async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, PaymentError> {
        info!(
            "Charging {} {} via {} for order {}",
            request.amount,
            CURRENCY,
            request.operator.as_str(),
            request.order_id
        );

        match &self.mode {
            GatewayMode::Simulated { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(ChargeOutcome::Confirmed {
                    transaction_id: format!("SIM-{}", Uuid::new_v4()),
                })
            }
            GatewayMode::Http { base_url, http } => {
                if !self.circuit_breaker.can_execute() {
                    warn!("Circuit breaker is OPEN - blocking payment provider request");
                    return Err(PaymentError::CircuitOpen);
                }

                let body = ProviderChargeRequest {
                    merchant_id: &self.merchant_id,
                    token: self.request_token(request.amount, &request.order_id),
                    order_id: &request.order_id,
                    amount: request.amount,
                    currency: CURRENCY,
                    operator: request.operator.as_str(),
                    phone: &request.phone,
                    description: &request.description,
                    notification_url: &self.webhook_url,
                };

                let response = async {
                    http.post(format!("{}/charges", base_url))
                        .json(&body)
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<ProviderChargeResponse>()
                        .await
                }
                .await;

                match response {
                    Ok(response) => {
                        self.circuit_breaker.record_success();
                        interpret_response(response)
                    }
                    Err(e) => {
                        error!("Payment provider request failed: {:?}", e);
                        self.circuit_breaker.record_failure();
                        Err(PaymentError::Transport(e))
                    }
                }
            }
        }
    }
}

fn interpret_response(response: ProviderChargeResponse) -> Result<ChargeOutcome, PaymentError> {
    if !response.success {
        return Err(PaymentError::Declined(
            response.message.unwrap_or_else(|| "declined by provider".to_string()),
        ));
    }

    let transaction_id = response
        .transaction_id
        .ok_or_else(|| PaymentError::Provider("missing transaction id".to_string()))?;

    match response.status.as_deref().map(str::to_ascii_uppercase).as_deref() {
        Some("SUCCESSFUL") | Some("CONFIRMED") | Some("COMPLETED") => Ok(ChargeOutcome::Confirmed { transaction_id }),
        Some("PENDING") | Some("NEW") | None => Ok(ChargeOutcome::Pending { transaction_id }),
        Some(other) => Err(PaymentError::Declined(
            response.message.unwrap_or_else(|| format!("provider status {}", other)),
        )),
    }
}

// --- Settlement ---

/// Pending payment row written before the provider is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentClaim {
    pub id: i64,
    pub booking_id: i64,
    pub amount: i64,
    /// Stands in for the provider's id until the charge returns.
    pub placeholder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(PaymentClaim),
    /// Cancelled, already paid, or someone else's booking.
    NotPayable,
    /// Another charge for the booking is still pending.
    InFlight,
}

/// Locks the booking and records a pending transaction for it, so only one
/// charge per booking can reach the provider.
pub async fn claim_payment(
    pool: &PgPool,
    booking_id: i64,
    user_id: i64,
    operator: MobileMoneyOperator,
    phone: &str,
) -> Result<ClaimOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let amount: Option<i64> = sqlx::query_scalar(
        "SELECT total_amount FROM bookings
         WHERE id = $1 AND user_id = $2
           AND booking_status <> 'cancelled' AND payment_status = 'pending'
         FOR UPDATE",
    )
    .bind(booking_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(amount) = amount else {
        tx.rollback().await?;
        return Ok(ClaimOutcome::NotPayable);
    };

    let placeholder_id = format!("PENDING-{}", Uuid::new_v4());
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO payment_transactions (booking_id, transaction_id, operator, phone, amount, status)
         VALUES ($1, $2, $3, $4, $5, 'pending')
         ON CONFLICT (booking_id) WHERE status = 'pending' DO NOTHING
         RETURNING id",
    )
    .bind(booking_id)
    .bind(&placeholder_id)
    .bind(operator.as_str())
    .bind(phone)
    .bind(amount)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(id) = id else {
        tx.rollback().await?;
        return Ok(ClaimOutcome::InFlight);
    };

    tx.commit().await?;
    Ok(ClaimOutcome::Claimed(PaymentClaim {
        id,
        booking_id,
        amount,
        placeholder_id,
    }))
}

/// Replaces the placeholder with the provider's transaction id.
pub async fn attach_provider_reference(
    pool: &PgPool,
    claim: &PaymentClaim,
    transaction_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE payment_transactions SET transaction_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(claim.id)
        .bind(transaction_id)
        .execute(pool)
        .await
        .map(|_| ())
}

/// Closes a claim whose charge never went through, so the customer can retry.
pub async fn abandon_claim(pool: &PgPool, claim: &PaymentClaim) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE payment_transactions SET status = 'failed', updated_at = NOW()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(claim.id)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Marks a pending transaction and its booking as paid.
///
/// Returns `false` when the transaction is unknown or already settled, so
/// duplicate webhooks are harmless.
pub async fn settle_success(state: &AppState, transaction_id: &str) -> Result<bool, sqlx::Error> {
    let mut tx = state.db.pool.begin().await?;

    let row = sqlx::query(
        "UPDATE payment_transactions SET status = 'completed', updated_at = NOW()
         WHERE transaction_id = $1 AND status = 'pending'
         RETURNING booking_id, operator",
    )
    .bind(transaction_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(false);
    };
    let booking_id: i64 = row.get("booking_id");
    let operator: String = row.get("operator");
    let method = match operator.as_str() {
        "orange" => PaymentMethod::OrangeMoney,
        _ => PaymentMethod::MtnMomo,
    };

    let booking = sqlx::query(
        "UPDATE bookings
         SET payment_status = $2, payment_method = $3, updated_at = NOW()
         WHERE id = $1 AND booking_status <> 'cancelled'
         RETURNING trip_id, seat_numbers",
    )
    .bind(booking_id)
    .bind(PaymentStatus::Completed.as_str())
    .bind(method.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    match booking {
        Some(row) => {
            let trip_id: i64 = row.get("trip_id");
            let seats: Vec<String> = row.get("seat_numbers");
            // Места уже записаны в брони, временные блокировки больше не нужны
            state.cache.release_seats(trip_id, &seats).await;
            state.cache.invalidate_trip_seats(trip_id).await;
            info!("Payment {} completed, booking {} paid, {} seats", transaction_id, booking_id, seats.len());
        }
        None => {
            warn!(
                "Payment {} completed for cancelled booking {}, needs a manual refund",
                transaction_id, booking_id
            );
        }
    }
    Ok(true)
}

/// Marks a pending transaction as failed (or expired) and cancels its booking,
/// returning the seats to the trip.
pub async fn settle_failure(
    state: &AppState,
    transaction_id: &str,
    expired: bool,
) -> Result<bool, sqlx::Error> {
    let mut tx = state.db.pool.begin().await?;

    let booking_id: Option<i64> = sqlx::query_scalar(
        "UPDATE payment_transactions SET status = $2, updated_at = NOW()
         WHERE transaction_id = $1 AND status = 'pending'
         RETURNING booking_id",
    )
    .bind(transaction_id)
    .bind(if expired { "expired" } else { "failed" })
    .fetch_optional(&mut *tx)
    .await?;

    let Some(booking_id) = booking_id else {
        tx.rollback().await?;
        return Ok(false);
    };

    let released = release_booking_in_tx(&mut tx, booking_id, Some(PaymentStatus::Failed)).await?;
    tx.commit().await?;

    if let Some((trip_id, seats)) = released {
        state.cache.release_seats(trip_id, &seats).await;
        state.cache.invalidate_trip_seats(trip_id).await;
        info!("Payment {} failed, booking {} cancelled, {} seats released", transaction_id, booking_id, seats.len());
    }
    Ok(true)
}

/// Handles a provider notification. Unknown statuses are logged and ignored.
pub async fn process_webhook(state: &AppState, transaction_id: &str, status: &str) -> Result<(), sqlx::Error> {
    info!("Processing webhook: transaction_id={}, status={}", transaction_id, status);

    let settled = match status.to_ascii_uppercase().as_str() {
        "SUCCESSFUL" | "CONFIRMED" | "COMPLETED" => settle_success(state, transaction_id).await?,
        "FAILED" | "REJECTED" | "CANCELLED" => settle_failure(state, transaction_id, false).await?,
        "EXPIRED" => settle_failure(state, transaction_id, true).await?,
        "PENDING" | "NEW" => return Ok(()),
        _ => {
            warn!("Unknown payment status '{}' for transaction {}", status, transaction_id);
            return Ok(());
        }
    };

    if !settled {
        warn!("Webhook for unknown or already settled transaction {}", transaction_id);
    }
    Ok(())
}
