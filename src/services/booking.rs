use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    cache::seats::HoldOutcome,
    config::SeatingConfig,
    middleware::AuthUser,
    models::{
        booking::BOOKING_COLUMNS, Booking, BookingWithTrip, PaymentStatus, TripSummary,
    },
    seating::{SeatMap, SeatSelection, SeatingError},
    AppState,
};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("trip not found")]
    TripNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("this trip has already departed")]
    Departed,
    #[error("booking is already cancelled")]
    AlreadyCancelled,
    #[error("select at least one seat")]
    NoSeatsRequested,
    #[error("seat {0} was requested twice")]
    DuplicateSeat(String),
    #[error("only {available} seat(s) left on this trip, {requested} requested")]
    TooManySeats { requested: usize, available: u32 },
    #[error("seats no longer available: {}", .0.join(", "))]
    SeatsUnavailable(Vec<String>),
    #[error("not enough seats left on this trip")]
    SoldOut,
    #[error(transparent)]
    Seating(#[from] SeatingError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, max = 50, message = "select between 1 and 50 seats"))]
    pub seats: Vec<String>,
    #[validate(length(min = 2, max = 120, message = "passenger name is required"))]
    pub passenger_name: String,
    #[validate(length(min = 8, max = 16, message = "passenger phone must be 8 to 16 characters"))]
    pub passenger_phone: String,
}

/// Seat map of a trip's bus; buses without a usable layout get the configured default.
pub fn seat_map_for<I, S>(trip: &TripSummary, occupied: I, defaults: &SeatingConfig) -> Result<SeatMap, SeatingError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let rows = match usize::try_from(trip.seat_rows) {
        Ok(rows) if (1..=26).contains(&rows) => rows,
        _ => defaults.default_rows as usize,
    };
    let columns = match u32::try_from(trip.seat_columns) {
        Ok(columns) if columns > 0 => columns,
        _ => defaults.default_columns,
    };
    SeatMap::lettered(rows, columns, occupied)
}

/// Replays a requested seat list through [`SeatSelection`] so server-side
/// bookings obey the same rules as the seat picker.
pub fn reconcile_selection(
    map: SeatMap,
    trip: &TripSummary,
    requested: &[String],
) -> Result<SeatSelection, BookingError> {
    if requested.is_empty() {
        return Err(BookingError::NoSeatsRequested);
    }

    let mut seen = HashSet::new();
    if let Some(dup) = requested.iter().find(|seat| !seen.insert(seat.as_str())) {
        return Err(BookingError::DuplicateSeat(dup.clone()));
    }

    let available = trip.remaining_seats();
    if requested.len() > available as usize {
        return Err(BookingError::TooManySeats {
            requested: requested.len(),
            available,
        });
    }

    let mut selection = SeatSelection::new(map, trip.price_per_seat(), available)?;
    selection.set_desired_seat_count(requested.len() as i64);

    let rejected: Vec<String> = requested
        .iter()
        .filter(|seat| !selection.toggle_seat(seat))
        .cloned()
        .collect();
    if !rejected.is_empty() {
        return Err(BookingError::SeatsUnavailable(rejected));
    }

    Ok(selection)
}

/// Seat map as `viewer` sees it: booked seats plus seats other customers hold.
pub async fn load_seat_map(
    state: &AppState,
    trip: &TripSummary,
    viewer: Option<i64>,
) -> Result<SeatMap, BookingError> {
    let booked = state.cache.booked_seats(trip.id).await?;
    let layout = seat_map_for(trip, &booked, &state.config.seating)?;

    let all_seats: Vec<_> = layout.seat_ids().collect();
    let held = state.cache.seats_held_by_others(trip.id, &all_seats, viewer).await;
    if held.is_empty() {
        return Ok(layout);
    }

    Ok(seat_map_for(trip, booked.iter().chain(held.iter()), &state.config.seating)?)
}

/// Books the requested seats: holds them in Redis, then writes the booking and
/// decrements the trip's seat count in one transaction.
pub async fn create_booking(
    state: &AppState,
    user: &AuthUser,
    trip_id: i64,
    request: &CreateBookingRequest,
) -> Result<Booking, BookingError> {
    let trip = TripSummary::find(&state.db.pool, trip_id)
        .await?
        .ok_or(BookingError::TripNotFound)?;
    if trip.has_departed(Utc::now()) {
        return Err(BookingError::Departed);
    }

    let map = load_seat_map(state, &trip, Some(user.user_id)).await?;
    let selection = reconcile_selection(map, &trip, &request.seats)?;

    let hold = state
        .cache
        .hold_seats(trip.id, selection.selected_seats(), user.user_id, state.config.seating.hold_ttl_seconds)
        .await;
    admit_hold(trip.id, hold)?;

    let seats: Vec<String> = selection.selected_seats().iter().map(|s| s.to_string()).collect();
    let total = i64::try_from(selection.total_amount()).unwrap_or(i64::MAX);

    let result = insert_booking(&state.db.pool, user.user_id, &trip, &seats, total, request).await;
    match result {
        Ok(booking) => {
            state.cache.invalidate_trip_seats(trip.id).await;
            info!(
                "Booking {} created: trip {} seats {:?} total {} FCFA",
                booking.reference, trip.id, seats, total
            );
            Ok(booking)
        }
        Err(e) => {
            state.cache.release_seats(trip.id, &seats).await;
            Err(e)
        }
    }
}

/// Redis holds only front the transactional seat check in [`insert_booking`],
/// so an unreachable Redis lets the booking go ahead without them.
fn admit_hold(trip_id: i64, hold: Result<HoldOutcome, redis::RedisError>) -> Result<(), BookingError> {
    match hold {
        Ok(HoldOutcome::Held) => Ok(()),
        Ok(HoldOutcome::Conflict(seats)) => Err(BookingError::SeatsUnavailable(seats)),
        Err(e) if is_transport_error(&e) => {
            warn!("Seat holds skipped for trip {}, Redis unavailable: {}", trip_id, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_transport_error(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

async fn insert_booking(
    pool: &PgPool,
    user_id: i64,
    trip: &TripSummary,
    seats: &[String],
    total: i64,
    request: &CreateBookingRequest,
) -> Result<Booking, BookingError> {
    let mut tx = pool.begin().await?;

    // Блокирует строку рейса: параллельные брони на этот рейс идут по очереди
    let decremented = sqlx::query(
        "UPDATE trips SET available_seats = available_seats - $2
         WHERE id = $1 AND available_seats >= $2",
    )
    .bind(trip.id)
    .bind(seats.len() as i32)
    .execute(&mut *tx)
    .await?;
    if decremented.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(BookingError::SoldOut);
    }

    let taken: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT seat
        FROM bookings b
        CROSS JOIN LATERAL unnest(b.seat_numbers) AS seat
        WHERE b.trip_id = $1
          AND b.booking_status <> 'cancelled'
          AND b.payment_status <> 'failed'
          AND seat = ANY($2)
        ORDER BY seat
        "#,
    )
    .bind(trip.id)
    .bind(seats)
    .fetch_all(&mut *tx)
    .await?;
    if !taken.is_empty() {
        tx.rollback().await?;
        return Err(BookingError::SeatsUnavailable(taken));
    }

    let booking = sqlx::query_as::<_, Booking>(&format!(
        "INSERT INTO bookings (reference, user_id, trip_id, passenger_name, passenger_phone, seat_numbers, total_amount)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {}",
        BOOKING_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(trip.id)
    .bind(request.passenger_name.trim())
    .bind(request.passenger_phone.trim())
    .bind(seats)
    .bind(total)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(booking)
}

/// Cancels a booking inside `tx` and returns its seats to the trip.
///
/// Returns the trip and seats released, or `None` if the booking was already cancelled.
pub(crate) async fn release_booking_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: i64,
    payment_status: Option<PaymentStatus>,
) -> Result<Option<(i64, Vec<String>)>, sqlx::Error> {
    let row = sqlx::query(
        "UPDATE bookings
         SET booking_status = 'cancelled',
             payment_status = COALESCE($2, payment_status),
             updated_at = NOW()
         WHERE id = $1 AND booking_status <> 'cancelled'
         RETURNING trip_id, seat_numbers",
    )
    .bind(booking_id)
    .bind(payment_status.map(|s| s.as_str()))
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let trip_id: i64 = row.get("trip_id");
    let seats: Vec<String> = row.get("seat_numbers");

    sqlx::query(
        "UPDATE trips SET available_seats = LEAST(total_seats, available_seats + $2)
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(seats.len() as i32)
    .execute(&mut **tx)
    .await?;

    Ok(Some((trip_id, seats)))
}

/// Customer-initiated cancellation; any pending charge is marked failed.
pub async fn cancel_booking(state: &AppState, user_id: i64, booking_id: i64) -> Result<Booking, BookingError> {
    let booking = Booking::find_for_user(&state.db.pool, booking_id, user_id)
        .await?
        .ok_or(BookingError::BookingNotFound)?;
    if booking.is_cancelled() {
        return Err(BookingError::AlreadyCancelled);
    }

    let mut tx = state.db.pool.begin().await?;
    sqlx::query(
        "UPDATE payment_transactions SET status = 'failed', updated_at = NOW()
         WHERE booking_id = $1 AND status = 'pending'",
    )
    .bind(booking_id)
    .execute(&mut *tx)
    .await?;

    let payment_status = booking.awaits_payment().then_some(PaymentStatus::Failed);
    let released = release_booking_in_tx(&mut tx, booking_id, payment_status).await?;
    tx.commit().await?;

    match released {
        Some((trip_id, seats)) => {
            state.cache.release_seats(trip_id, &seats).await;
            state.cache.invalidate_trip_seats(trip_id).await;
            info!("Booking {} cancelled, {} seats released", booking_id, seats.len());
        }
        None => warn!("Booking {} was cancelled concurrently", booking_id),
    }

    Booking::find(&state.db.pool, booking_id)
        .await?
        .ok_or(BookingError::BookingNotFound)
}

/// Trip history split the way the "My trips" page shows it.
#[derive(Debug, Clone, Serialize)]
pub struct TripHistory {
    /// Soonest departure first.
    pub upcoming: Vec<BookingWithTrip>,
    /// Most recent departure first.
    pub past: Vec<BookingWithTrip>,
}

pub fn partition_history(bookings: Vec<BookingWithTrip>, now: DateTime<Utc>) -> TripHistory {
    let (mut upcoming, mut past): (Vec<_>, Vec<_>) = bookings.into_iter().partition(|b| b.is_upcoming(now));
    upcoming.sort_by(|a, b| a.departure_at.cmp(&b.departure_at).then(a.id.cmp(&b.id)));
    past.sort_by(|a, b| b.departure_at.cmp(&a.departure_at).then(b.id.cmp(&a.id)));
    TripHistory { upcoming, past }
}

pub async fn trip_history(state: &AppState, user_id: i64) -> Result<TripHistory, BookingError> {
    let bookings = Booking::history_for_user(&state.db.pool, user_id).await?;
    Ok(partition_history(bookings, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{booking::fixtures as db, trip::fixtures, BookingStatus};
    use chrono::Duration;

    fn defaults() -> SeatingConfig {
        SeatingConfig {
            hold_ttl_seconds: 300,
            default_rows: 10,
            default_columns: 5,
        }
    }

    fn seats(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn layout_falls_back_to_defaults() {
        let mut trip = fixtures::trip("VIP", 5000, &[]);
        trip.seat_rows = 0;
        trip.seat_columns = 0;
        let map = seat_map_for(&trip, Vec::<String>::new(), &defaults()).unwrap();
        assert_eq!(map.capacity(), 50);

        trip.seat_rows = 5;
        trip.seat_columns = 4;
        let map = seat_map_for(&trip, ["A1", "Z9"], &defaults()).unwrap();
        assert_eq!(map.capacity(), 20);
        assert!(map.is_occupied("A1"));
        assert!(!map.contains("Z9"));
    }

    #[test]
    fn reconciles_valid_request() {
        let trip = fixtures::trip("VIP", 5000, &[]);
        let map = seat_map_for(&trip, ["A1"], &defaults()).unwrap();
        let selection = reconcile_selection(map, &trip, &seats(&["B2", "A3"])).unwrap();
        assert_eq!(selection.selected_seats(), ["B2", "A3"]);
        assert_eq!(selection.total_amount(), 10_000);
    }

    #[test]
    fn occupied_and_unknown_seats_are_reported() {
        let trip = fixtures::trip("VIP", 5000, &[]);
        let map = seat_map_for(&trip, ["A1"], &defaults()).unwrap();
        match reconcile_selection(map, &trip, &seats(&["A1", "B2", "Q1"])) {
            Err(BookingError::SeatsUnavailable(rejected)) => assert_eq!(rejected, seats(&["A1", "Q1"])),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(selection) => panic!("unexpected selection {:?}", selection.snapshot()),
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        let trip = fixtures::trip("VIP", 5000, &[]);
        let map = seat_map_for(&trip, Vec::<String>::new(), &defaults()).unwrap();
        assert!(matches!(
            reconcile_selection(map, &trip, &seats(&["B2", "B2"])),
            Err(BookingError::DuplicateSeat(seat)) if seat == "B2"
        ));
    }

    #[test]
    fn cannot_request_more_than_remaining() {
        let mut trip = fixtures::trip("VIP", 5000, &[]);
        trip.available_seats = 1;
        let map = seat_map_for(&trip, Vec::<String>::new(), &defaults()).unwrap();
        assert!(matches!(
            reconcile_selection(map, &trip, &seats(&["A1", "A2"])),
            Err(BookingError::TooManySeats { requested: 2, available: 1 })
        ));
    }

    #[test]
    fn sold_out_trip_cannot_be_booked() {
        let mut trip = fixtures::trip("VIP", 5000, &[]);
        trip.available_seats = 0;
        let map = seat_map_for(&trip, Vec::<String>::new(), &defaults()).unwrap();
        assert!(matches!(
            reconcile_selection(map, &trip, &[]),
            Err(BookingError::NoSeatsRequested)
        ));
        let map = seat_map_for(&trip, Vec::<String>::new(), &defaults()).unwrap();
        assert!(matches!(
            reconcile_selection(map, &trip, &seats(&["A1"])),
            Err(BookingError::TooManySeats { .. })
        ));
    }

    fn history_entry(id: i64, departure_at: DateTime<Utc>, status: BookingStatus) -> BookingWithTrip {
        BookingWithTrip {
            id,
            reference: Uuid::new_v4(),
            trip_id: 1,
            passenger_name: "Amina Njoya".to_string(),
            seat_numbers: seats(&["A1"]),
            total_amount: 5000,
            payment_status: PaymentStatus::Completed.as_str().to_string(),
            payment_method: None,
            booking_status: status.as_str().to_string(),
            created_at: departure_at - Duration::days(3),
            agency_name: "Garanti Express".to_string(),
            bus_type: "VIP".to_string(),
            departure_city: "Douala".to_string(),
            destination_city: "Yaoundé".to_string(),
            departure_at,
            arrival_at: departure_at + Duration::minutes(210),
        }
    }

    #[test]
    fn history_splits_upcoming_and_past() {
        let now = Utc::now();
        let history = partition_history(
            vec![
                history_entry(1, now - Duration::days(10), BookingStatus::Completed),
                history_entry(2, now + Duration::days(5), BookingStatus::Confirmed),
                history_entry(3, now + Duration::days(1), BookingStatus::Confirmed),
                history_entry(4, now + Duration::days(2), BookingStatus::Cancelled),
                history_entry(5, now - Duration::days(1), BookingStatus::Confirmed),
            ],
            now,
        );

        let upcoming: Vec<i64> = history.upcoming.iter().map(|b| b.id).collect();
        let past: Vec<i64> = history.past.iter().map(|b| b.id).collect();
        assert_eq!(upcoming, vec![3, 2]);
        // cancelled future trips land in the past tab
        assert_eq!(past, vec![4, 5, 1]);
    }

    fn passenger(seat_ids: &[&str]) -> CreateBookingRequest {
        CreateBookingRequest {
            seats: seats(seat_ids),
            passenger_name: "Amina Njoya".to_string(),
            passenger_phone: "+237670000000".to_string(),
        }
    }

    #[test]
    fn redis_outage_does_not_block_booking() {
        let io = redis::RedisError::from(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"));
        assert!(admit_hold(1, Err(io)).is_ok());

        let other = redis::RedisError::from((redis::ErrorKind::TypeError, "unexpected reply"));
        assert!(matches!(admit_hold(1, Err(other)), Err(BookingError::Redis(_))));

        assert!(admit_hold(1, Ok(HoldOutcome::Held)).is_ok());
        match admit_hold(1, Ok(HoldOutcome::Conflict(seats(&["B3"])))) {
            Err(BookingError::SeatsUnavailable(taken)) => assert_eq!(taken, seats(&["B3"])),
            other => panic!("expected SeatsUnavailable, got {:?}", other),
        }
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn taken_seat_is_rejected_and_counted_once(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let first_user = db::customer(&pool, "first@example.cm").await;
        let second_user = db::customer(&pool, "second@example.cm").await;
        let before = db::available_seats(&pool, trip.id).await;

        let request = passenger(&["A1"]);
        let booking = insert_booking(&pool, first_user, &trip, &request.seats, trip.price, &request)
            .await
            .unwrap();
        assert_eq!(booking.seat_numbers, seats(&["A1"]));
        assert_eq!(booking.payment_status(), Some(PaymentStatus::Pending));

        let request = passenger(&["A1", "A2"]);
        let err = insert_booking(&pool, second_user, &trip, &request.seats, trip.price * 2, &request)
            .await
            .unwrap_err();
        match err {
            BookingError::SeatsUnavailable(taken) => assert_eq!(taken, seats(&["A1"])),
            other => panic!("expected SeatsUnavailable, got {:?}", other),
        }

        // the rejected attempt rolled back its decrement
        assert_eq!(db::available_seats(&pool, trip.id).await, before - 1);
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn booking_more_seats_than_left_is_sold_out(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let user = db::customer(&pool, "late@example.cm").await;
        sqlx::query("UPDATE trips SET available_seats = 1 WHERE id = $1")
            .bind(trip.id)
            .execute(&pool)
            .await
            .unwrap();

        let request = passenger(&["C1", "C2"]);
        let err = insert_booking(&pool, user, &trip, &request.seats, trip.price * 2, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::SoldOut));
        assert_eq!(db::available_seats(&pool, trip.id).await, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test(migrations = "./src/migrations")]
    async fn released_seats_can_be_booked_again(pool: PgPool) {
        let trip = db::seeded_trip(&pool, "Douala").await;
        let user = db::customer(&pool, "again@example.cm").await;
        let before = db::available_seats(&pool, trip.id).await;

        let request = passenger(&["D4", "D5"]);
        let booking = insert_booking(&pool, user, &trip, &request.seats, trip.price * 2, &request)
            .await
            .unwrap();
        assert_eq!(db::available_seats(&pool, trip.id).await, before - 2);

        let mut tx = pool.begin().await.unwrap();
        let released = release_booking_in_tx(&mut tx, booking.id, Some(PaymentStatus::Failed))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(released, Some((trip.id, seats(&["D4", "D5"]))));
        assert_eq!(db::available_seats(&pool, trip.id).await, before);

        // a second release is a no-op
        let mut tx = pool.begin().await.unwrap();
        assert_eq!(release_booking_in_tx(&mut tx, booking.id, None).await.unwrap(), None);
        tx.commit().await.unwrap();
        assert_eq!(db::available_seats(&pool, trip.id).await, before);

        let rebooked = insert_booking(&pool, user, &trip, &request.seats, trip.price * 2, &request).await;
        assert!(rebooked.is_ok());
    }
}
