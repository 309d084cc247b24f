use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::{ApiResult, AppError},
    middleware::AuthUser,
    models::{BusType, TripFilters, TripSummary},
    search_client::TripQuery,
    seating::SeatId,
    services::booking::{load_seat_map, BookingError},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", get(search_trips))
        .route("/trips/{id}", get(get_trip))
        .route("/trips/{id}/seats", get(get_trip_seats))
}

#[derive(Debug, Default, Deserialize)]
pub struct TripSearchParams {
    pub from: Option<String>,
    pub to: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    /// Comma separated, e.g. `VIP,Classic`.
    pub bus_types: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    /// Comma separated, e.g. `Wi-Fi,AC`.
    pub amenities: Option<String>,
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

impl TripSearchParams {
    fn query(&self) -> Result<TripQuery, AppError> {
        let date = match self.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| AppError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", raw)))?,
            ),
            None => None,
        };
        Ok(TripQuery::new(self.from.as_deref(), self.to.as_deref(), date))
    }

    fn filters(&self) -> Result<TripFilters, AppError> {
        let defaults = TripFilters::default();
        let bus_types = split_list(self.bus_types.as_deref())
            .map(str::parse::<BusType>)
            .collect::<Result<Vec<_>, _>>()?;

        let filters = TripFilters {
            bus_types,
            min_price: self.min_price.unwrap_or(defaults.min_price),
            max_price: self.max_price.unwrap_or(defaults.max_price),
            amenities: split_list(self.amenities.as_deref()).map(str::to_string).collect(),
        };
        if filters.min_price > filters.max_price {
            return Err(AppError::BadRequest("min_price must not exceed max_price".to_string()));
        }
        Ok(filters)
    }
}

/// GET /api/trips
async fn search_trips(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TripSearchParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.query()?;
    let filters = params.filters()?;

    let (trips, cache_status) = match state.cache.get_cached_trip_search(&query).await {
        Some(trips) => (trips, "HIT"),
        None => {
            let trips = state.search_client.search_trips(&query).await?;
            state.cache.cache_trip_search(&query, &trips).await;
            (trips, "MISS")
        }
    };

    let trips = filters.apply(trips);
    Ok((
        [("x-cache", cache_status)],
        Json(json!({
            "success": true,
            "count": trips.len(),
            "trips": trips,
        })),
    ))
}

/// GET /api/trips/{id}
async fn get_trip(State(state): State<Arc<AppState>>, Path(trip_id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let trip = TripSummary::find(&state.db.pool, trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound("trip not found".to_string()))?;
    Ok(Json(json!({ "success": true, "trip": trip })))
}

#[derive(Debug, Serialize)]
struct SeatView {
    id: SeatId,
    occupied: bool,
}

#[derive(Debug, Serialize)]
struct SeatMapResponse {
    success: bool,
    trip_id: i64,
    rows: Vec<String>,
    columns: Vec<u32>,
    seats: Vec<SeatView>,
    occupied: Vec<SeatId>,
    price_per_seat: u64,
    available_seats: u32,
}

/// GET /api/trips/{id}/seats
///
/// Signed-in customers see their own holds as free.
async fn get_trip_seats(
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<i64>,
    viewer: Option<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let trip = TripSummary::find(&state.db.pool, trip_id)
        .await?
        .ok_or(BookingError::TripNotFound)?;

    let map = load_seat_map(&state, &trip, viewer.map(|user| user.user_id)).await?;
    let seats = map
        .seat_ids()
        .map(|id| SeatView {
            occupied: map.is_occupied(id.as_str()),
            id,
        })
        .collect();

    Ok(Json(SeatMapResponse {
        success: true,
        trip_id: trip.id,
        rows: map.rows().to_vec(),
        columns: map.columns().to_vec(),
        seats,
        occupied: map.occupied_seats(),
        price_per_seat: trip.price_per_seat(),
        available_seats: trip.remaining_seats(),
    }))
}
