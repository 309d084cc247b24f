use sqlx::PgPool;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{models::PaymentStatus, services::booking::release_booking_in_tx, AppState};

/// Expires bookings whose payment never arrived and gives their seats back.
pub struct CleanupService {
    state: Arc<AppState>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_bookings: usize,
    pub released_seats: usize,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Runs a pass every `cleanup.interval_seconds` until the task is dropped.
    pub async fn run_forever(self) {
        let mut ticker = interval(Duration::from_secs(self.state.config.cleanup.interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run().await;
        }
    }

    /// Одна полная очистка зависших неоплаченных броней
    pub async fn run(&self) -> CleanupReport {
        let timeout_minutes = self.state.config.payment.pending_timeout_minutes;

        let stale = match stale_unpaid_bookings(&self.state.db.pool, timeout_minutes).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to look up stale bookings: {:?}", e);
                return CleanupReport::default();
            }
        };

        if stale.is_empty() {
            info!("🎫 No stale unpaid bookings to cleanup");
            return CleanupReport::default();
        }

        info!("🎫 Found {} stale unpaid bookings to cleanup", stale.len());

        let mut report = CleanupReport::default();
        for booking_id in stale {
            match self.expire_booking(booking_id).await {
                Ok(Some(seats)) => {
                    report.expired_bookings += 1;
                    report.released_seats += seats;
                }
                Ok(None) => warn!("🎫 Booking {} was settled before cleanup reached it", booking_id),
                Err(e) => error!("🎫 Failed to expire booking {}: {:?}", booking_id, e),
            }
        }

        info!(
            "✅ Cleanup finished: {} bookings expired, {} seats released",
            report.expired_bookings, report.released_seats
        );
        report
    }

    async fn expire_booking(&self, booking_id: i64) -> Result<Option<usize>, sqlx::Error> {
        let released = expire_unpaid_booking(&self.state.db.pool, booking_id).await?;

        Ok(match released {
            Some((trip_id, seats)) => {
                self.state.cache.release_seats(trip_id, &seats).await;
                self.state.cache.invalidate_trip_seats(trip_id).await;
                info!("🎫 Booking {} expired, {} seats released", booking_id, seats.len());
                Some(seats.len())
            }
            None => None,
        })
    }
}

/// Unpaid bookings older than the timeout with no recent charge attempt.
pub(crate) async fn stale_unpaid_bookings(pool: &PgPool, timeout_minutes: i64) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT b.id
        FROM bookings b
        WHERE b.booking_status = 'confirmed'
          AND b.payment_status = 'pending'
          AND b.created_at < NOW() - make_interval(mins => $1::int)
          AND NOT EXISTS (
              SELECT 1 FROM payment_transactions pt
              WHERE pt.booking_id = b.id
                AND pt.status = 'pending'
                AND pt.created_at >= NOW() - make_interval(mins => $1::int)
          )
        ORDER BY b.id
        "#,
    )
    .bind(timeout_minutes)
    .fetch_all(pool)
    .await
}

/// Expires the booking's pending charges and cancels it, unless it got paid meanwhile.
pub(crate) async fn expire_unpaid_booking(
    pool: &PgPool,
    booking_id: i64,
) -> Result<Option<(i64, Vec<String>)>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Only still-unpaid bookings; a webhook may have landed in the meantime
    let still_pending: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM bookings WHERE id = $1 AND payment_status = 'pending' FOR UPDATE",
    )
    .bind(booking_id)
    .fetch_optional(&mut *tx)
    .await?;
    if still_pending.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    sqlx::query(
        "UPDATE payment_transactions SET status = 'expired', updated_at = NOW()
         WHERE booking_id = $1 AND status = 'pending'",
    )
    .bind(booking_id)
    .execute(&mut *tx)
    .await?;

    let released = release_booking_in_tx(&mut tx, booking_id, Some(PaymentStatus::Failed)).await?;
    tx.commit().await?;
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{booking::fixtures as db, Booking, BookingStatus};

    const TIMEOUT_MINUTES: i64 = 15;

    async fn pending_charge(pool: &PgPool, booking: &Booking, age_minutes: i32) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO payment_transactions (booking_id, transaction_id, operator, phone, amount, status, created_at)
             VALUES ($1, $2, 'mtn', '+237670000000', $3, 'pending', NOW() - make_interval(mins => $4))
             RETURNING id",
        )
        .bind(booking.id)
        .bind(format!("MTN-{}", booking.id))
        .bind(booking.total_amount)
        .bind(age_minutes)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn transaction_status(pool: &PgPool, id: i64) -> String {
        sqlx::query_scalar("SELECT status FROM payment_transactions WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn only_timed_out_unpaid_bookings_are_stale(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let user = db::customer(&pool, "cleanup@example.cm").await;

        let abandoned = db::unpaid_booking(&pool, user, &trip, &["A1"]).await;
        db::age_booking(&pool, abandoned.id, 30).await;

        let fresh = db::unpaid_booking(&pool, user, &trip, &["A2"]).await;

        let awaiting_handset = db::unpaid_booking(&pool, user, &trip, &["A3"]).await;
        db::age_booking(&pool, awaiting_handset.id, 30).await;
        pending_charge(&pool, &awaiting_handset, 2).await;

        let forgotten_charge = db::unpaid_booking(&pool, user, &trip, &["A4"]).await;
        db::age_booking(&pool, forgotten_charge.id, 30).await;
        pending_charge(&pool, &forgotten_charge, 25).await;

        let paid = db::unpaid_booking(&pool, user, &trip, &["A5"]).await;
        db::age_booking(&pool, paid.id, 30).await;
        sqlx::query("UPDATE bookings SET payment_status = 'completed' WHERE id = $1")
            .bind(paid.id)
            .execute(&pool)
            .await
            .unwrap();

        let stale = stale_unpaid_bookings(&pool, TIMEOUT_MINUTES).await.unwrap();
        assert_eq!(stale, vec![abandoned.id, forgotten_charge.id]);
        assert!(!stale.contains(&fresh.id));
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn expiring_returns_seats_and_closes_charges(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let user = db::customer(&pool, "expire@example.cm").await;
        let before = db::available_seats(&pool, trip.id).await;

        let booking = db::unpaid_booking(&pool, user, &trip, &["B1", "B2"]).await;
        let charge = pending_charge(&pool, &booking, 25).await;
        assert_eq!(db::available_seats(&pool, trip.id).await, before - 2);

        let released = expire_unpaid_booking(&pool, booking.id).await.unwrap();
        assert_eq!(released, Some((trip.id, vec!["B1".to_string(), "B2".to_string()])));
        assert_eq!(db::available_seats(&pool, trip.id).await, before);
        assert_eq!(transaction_status(&pool, charge).await, "expired");

        let booking = Booking::find(&pool, booking.id).await.unwrap().unwrap();
        assert_eq!(booking.booking_status(), Some(BookingStatus::Cancelled));
        assert_eq!(booking.payment_status(), Some(PaymentStatus::Failed));
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn paid_booking_is_left_alone(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let user = db::customer(&pool, "paid@example.cm").await;

        let booking = db::unpaid_booking(&pool, user, &trip, &["C1"]).await;
        let charge = pending_charge(&pool, &booking, 25).await;
        sqlx::query("UPDATE bookings SET payment_status = 'completed' WHERE id = $1")
            .bind(booking.id)
            .execute(&pool)
            .await
            .unwrap();
        let before = db::available_seats(&pool, trip.id).await;

        assert_eq!(expire_unpaid_booking(&pool, booking.id).await.unwrap(), None);
        assert_eq!(db::available_seats(&pool, trip.id).await, before);
        assert_eq!(transaction_status(&pool, charge).await, "pending");
    }
}
