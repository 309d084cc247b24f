use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

text_enum!(
    BusType {
        Vip => "VIP",
        Classic => "Classic",
        Minibus => "Minibus",
    }
);

/// Trip joined with its route, bus and agency, as shown in search results and
/// on the booking page.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TripSummary {
    pub id: i64,
    pub agency_id: i64,
    pub agency_name: String,
    pub agency_logo_url: Option<String>,
    pub agency_rating: f64,
    pub departure_city: String,
    pub destination_city: String,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub price: i64,
    pub bus_type: String,
    pub seat_rows: i32,
    pub seat_columns: i32,
    pub available_seats: i32,
    pub total_seats: i32,
    pub amenities: Vec<String>,
}

pub(crate) const TRIP_SUMMARY_SELECT: &str = r#"
    SELECT t.id,
           a.id AS agency_id,
           a.name AS agency_name,
           a.logo_url AS agency_logo_url,
           a.rating AS agency_rating,
           r.departure_city,
           r.destination_city,
           t.departure_at,
           t.arrival_at,
           r.duration_minutes,
           t.price,
           b.bus_type,
           b.seat_rows,
           b.seat_columns,
           t.available_seats,
           t.total_seats,
           b.amenities
    FROM trips t
    JOIN routes r ON r.id = t.route_id
    JOIN buses b ON b.id = t.bus_id
    JOIN agencies a ON a.id = b.agency_id
"#;

impl TripSummary {
    pub async fn find(pool: &PgPool, trip_id: i64) -> Result<Option<TripSummary>, sqlx::Error> {
        sqlx::query_as::<_, TripSummary>(&format!("{} WHERE t.id = $1", TRIP_SUMMARY_SELECT))
            .bind(trip_id)
            .fetch_optional(pool)
            .await
    }

    pub fn bus_type(&self) -> Option<BusType> {
        self.bus_type.parse().ok()
    }

    /// Price per seat in FCFA; negative prices never pass the table CHECK.
    pub fn price_per_seat(&self) -> u64 {
        u64::try_from(self.price).unwrap_or(0)
    }

    pub fn remaining_seats(&self) -> u32 {
        u32::try_from(self.available_seats).unwrap_or(0)
    }

    pub fn has_departed(&self, now: DateTime<Utc>) -> bool {
        self.departure_at <= now
    }
}

/// Refinements applied on top of the city/date query, like the filter panel
/// of the search page.
#[derive(Debug, Clone, PartialEq)]
pub struct TripFilters {
    /// Empty means every bus type.
    pub bus_types: Vec<BusType>,
    pub min_price: i64,
    pub max_price: i64,
    /// Every listed amenity must be on the bus.
    pub amenities: Vec<String>,
}

impl Default for TripFilters {
    fn default() -> Self {
        Self {
            bus_types: Vec::new(),
            min_price: 0,
            max_price: 20_000,
            amenities: Vec::new(),
        }
    }
}

impl TripFilters {
    pub fn matches(&self, trip: &TripSummary) -> bool {
        if !self.bus_types.is_empty() {
            match trip.bus_type() {
                Some(bus_type) if self.bus_types.contains(&bus_type) => {}
                _ => return false,
            }
        }

        if trip.price < self.min_price || trip.price > self.max_price {
            return false;
        }

        self.amenities
            .iter()
            .all(|wanted| trip.amenities.iter().any(|have| have.eq_ignore_ascii_case(wanted)))
    }

    pub fn apply(&self, trips: Vec<TripSummary>) -> Vec<TripSummary> {
        trips.into_iter().filter(|trip| self.matches(trip)).collect()
    }
}
