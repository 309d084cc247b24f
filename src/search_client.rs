use chrono::NaiveDate;
use sqlx::PgPool;

use crate::models::trip::{TripSummary, TRIP_SUMMARY_SELECT};

/// City/date part of a trip search; the rest lives in [`crate::models::TripFilters`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripQuery {
    pub departure_city: Option<String>,
    pub destination_city: Option<String>,
    /// Local calendar day in Cameroon.
    pub date: Option<NaiveDate>,
}

impl TripQuery {
    pub fn new(from: Option<&str>, to: Option<&str>, date: Option<NaiveDate>) -> Self {
        Self {
            departure_city: from.and_then(normalize_city),
            destination_city: to.and_then(normalize_city),
            date,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.departure_city.is_none() && self.destination_city.is_none() && self.date.is_none()
    }
}

/// Trims and collapses whitespace; blank input means "any city".
fn normalize_city(raw: &str) -> Option<String> {
    let city = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!city.is_empty()).then_some(city)
}

/// Поиск рейсов
#[derive(Clone)]
pub struct SearchClient {
    pool: PgPool,
}

impl SearchClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn search_trips(&self, query: &TripQuery) -> Result<Vec<TripSummary>, sqlx::Error> {
        if query.is_empty() {
            self.upcoming_trips().await
        } else {
            self.filtered_trips(query).await
        }
    }

    /// Быстрый путь: без фильтров просто ближайшие рейсы
    async fn upcoming_trips(&self) -> Result<Vec<TripSummary>, sqlx::Error> {
        sqlx::query_as::<_, TripSummary>(&format!(
            "{} WHERE t.departure_at > NOW() ORDER BY t.departure_at LIMIT 100",
            TRIP_SUMMARY_SELECT
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn filtered_trips(&self, query: &TripQuery) -> Result<Vec<TripSummary>, sqlx::Error> {
        sqlx::query_as::<_, TripSummary>(&format!(
            r#"{}
            WHERE ($1::text IS NULL OR lower(r.departure_city) = lower($1))
              AND ($2::text IS NULL OR lower(r.destination_city) = lower($2))
              AND CASE
                    WHEN $3::date IS NULL THEN t.departure_at > NOW()
                    ELSE (t.departure_at AT TIME ZONE 'Africa/Douala')::date = $3
                  END
            ORDER BY t.departure_at
            LIMIT 100
            "#,
            TRIP_SUMMARY_SELECT
        ))
        .bind(query.departure_city.as_deref())
        .bind(query.destination_city.as_deref())
        .bind(query.date)
        .fetch_all(&self.pool)
        .await
    }
}
