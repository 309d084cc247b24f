use crate::cache::CacheService;
use crate::search_client::TripQuery;
use crate::models::TripSummary;

const SEARCH_TTL_SECONDS: u64 = 300;

pub(crate) fn trip_search_key(query: &TripQuery) -> String {
    format!(
        "search:trips:from={}&to={}&date={}",
        query.departure_city.as_deref().unwrap_or_default().to_lowercase(),
        query.destination_city.as_deref().unwrap_or_default().to_lowercase(),
        query.date.map(|d| d.to_string()).unwrap_or_default(),
    )
}

impl CacheService {
    /// City/date results before the filter panel is applied.
    pub async fn get_cached_trip_search(&self, query: &TripQuery) -> Option<Vec<TripSummary>> {
        self.get_json(&trip_search_key(query)).await
    }

    pub async fn cache_trip_search(&self, query: &TripQuery, trips: &[TripSummary]) {
        self.put_json(&trip_search_key(query), &trips, SEARCH_TTL_SECONDS).await;
    }

    /// Search results embed seat counts, so every booking change drops them.
    pub async fn invalidate_trip_searches(&self) {
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("search:trips:*")
            .query_async(&mut conn)
            .await
            .unwrap_or_default();
        if keys.is_empty() {
            return;
        }
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.del(key);
        }
        let _: Result<(), _> = pipe.query_async(&mut conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn search_key_is_case_insensitive_on_cities() {
        let a = TripQuery {
            departure_city: Some("Douala".into()),
            destination_city: Some("YAOUNDÉ".into()),
            date: NaiveDate::from_ymd_opt(2026, 3, 14),
        };
        let b = TripQuery {
            departure_city: Some("douala".into()),
            destination_city: Some("yaoundé".into()),
            date: NaiveDate::from_ymd_opt(2026, 3, 14),
        };
        assert_eq!(trip_search_key(&a), trip_search_key(&b));
        assert_eq!(
            trip_search_key(&a),
            "search:trips:from=douala&to=yaoundé&date=2026-03-14"
        );
    }
}
