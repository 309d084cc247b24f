use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

text_enum!(
    PaymentStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

text_enum!(
    PaymentMethod {
        MtnMomo => "mtn_momo",
        OrangeMoney => "orange_money",
        Card => "card",
        Cash => "cash",
    }
);

text_enum!(
    BookingStatus {
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Completed => "completed",
    }
);

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: i64,
    pub reference: Uuid,
    pub user_id: i64,
    pub trip_id: i64,
    pub passenger_name: String,
    pub passenger_phone: String,
    pub seat_numbers: Vec<String>,
    pub total_amount: i64,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub booking_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const BOOKING_COLUMNS: &str = "id, reference, user_id, trip_id, passenger_name, passenger_phone, \
     seat_numbers, total_amount, payment_status, payment_method, booking_status, created_at, updated_at";

/// Booking plus the trip facts the trip history needs.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BookingWithTrip {
    pub id: i64,
    pub reference: Uuid,
    pub trip_id: i64,
    pub passenger_name: String,
    pub seat_numbers: Vec<String>,
    pub total_amount: i64,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub booking_status: String,
    pub created_at: DateTime<Utc>,
    pub agency_name: String,
    pub bus_type: String,
    pub departure_city: String,
    pub destination_city: String,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
}

impl Booking {
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.payment_status.parse().ok()
    }

    pub fn booking_status(&self) -> Option<BookingStatus> {
        self.booking_status.parse().ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.booking_status() == Some(BookingStatus::Cancelled)
    }

    pub fn awaits_payment(&self) -> bool {
        !self.is_cancelled() && self.payment_status() == Some(PaymentStatus::Pending)
    }

    pub async fn find(pool: &PgPool, booking_id: i64) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(booking_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_for_user(
        pool: &PgPool,
        booking_id: i64,
        user_id: i64,
    ) -> Result<Option<Booking>, sqlx::Error> {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE id = $1 AND user_id = $2",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn history_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<BookingWithTrip>, sqlx::Error> {
        sqlx::query_as::<_, BookingWithTrip>(
            r#"
            SELECT bk.id, bk.reference, bk.trip_id, bk.passenger_name, bk.seat_numbers,
                   bk.total_amount, bk.payment_status, bk.payment_method, bk.booking_status,
                   bk.created_at,
                   a.name AS agency_name, b.bus_type,
                   r.departure_city, r.destination_city,
                   t.departure_at, t.arrival_at
            FROM bookings bk
            JOIN trips t ON t.id = bk.trip_id
            JOIN routes r ON r.id = t.route_id
            JOIN buses b ON b.id = t.bus_id
            JOIN agencies a ON a.id = b.agency_id
            WHERE bk.user_id = $1
            ORDER BY t.departure_at DESC, bk.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

impl BookingWithTrip {
    /// Upcoming means departing later than `now` and not cancelled.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.departure_at > now && self.booking_status != BookingStatus::Cancelled.as_str()
    }
}
