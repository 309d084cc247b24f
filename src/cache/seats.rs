use crate::cache::CacheService;
use crate::seating::SeatId;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tracing::{info, warn};

const BOOKED_TTL_SECONDS: u64 = 60;

fn booked_key(trip_id: i64) -> String {
    format!("trip:{}:booked", trip_id)
}

fn hold_key(trip_id: i64, seat: &str) -> String {
    format!("trip:{}:seat:{}:hold", trip_id, seat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Held,
    /// Seats someone else holds; nothing was acquired.
    Conflict(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeatClaim {
    Acquired,
    AlreadyOwn,
    HeldByOther,
}

const CLAIM_ATTEMPTS: usize = 3;

async fn claim_seat(
    conn: &mut MultiplexedConnection,
    key: &str,
    user_id: i64,
    ttl_seconds: u64,
) -> Result<SeatClaim, redis::RedisError> {
    for _ in 0..CLAIM_ATTEMPTS {
        // SET NX EX - атомарная операция без гонок
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(user_id)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(conn)
            .await?;
        if set.is_some() {
            return Ok(SeatClaim::Acquired);
        }

        // Ключ мог истечь между SET и GET, тогда просто повторяем
        let holder: Option<i64> = conn.get(key).await?;
        match holder {
            Some(holder) if holder == user_id => {
                let refreshed: bool = conn.expire(key, ttl_seconds as i64).await?;
                if refreshed {
                    return Ok(SeatClaim::AlreadyOwn);
                }
            }
            Some(_) => return Ok(SeatClaim::HeldByOther),
            None => {}
        }
    }

    // Hold keeps flickering between holders; treat the seat as taken.
    Ok(SeatClaim::HeldByOther)
}

impl CacheService {
    /// Seats already sold or awaiting payment on the trip.
    pub async fn booked_seats(&self, trip_id: i64) -> Result<Vec<String>, sqlx::Error> {
        if let Some(seats) = self.get_json::<Vec<String>>(&booked_key(trip_id)).await {
            return Ok(seats);
        }

        let seats = self.load_booked_seats_from_db(trip_id).await?;
        self.put_json(&booked_key(trip_id), &seats, BOOKED_TTL_SECONDS).await;
        Ok(seats)
    }

    async fn load_booked_seats_from_db(&self, trip_id: i64) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT seat
            FROM bookings b
            CROSS JOIN LATERAL unnest(b.seat_numbers) AS seat
            WHERE b.trip_id = $1
              AND b.booking_status <> 'cancelled'
              AND b.payment_status <> 'failed'
            ORDER BY seat
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.db.pool)
        .await
    }

    /// Seats currently held by anyone other than `viewer`.
    ///
    /// If Redis is down the holds are simply not visible; the booking write
    /// still re-checks them.
    pub async fn seats_held_by_others(&self, trip_id: i64, seats: &[SeatId], viewer: Option<i64>) -> Vec<String> {
        if seats.is_empty() {
            return Vec::new();
        }

        let mut conn = self.redis.conn.clone();
        let mut pipe = redis::pipe();
        for seat in seats {
            pipe.get(hold_key(trip_id, seat.as_str()));
        }

        let holders: Vec<Option<i64>> = match pipe.query_async(&mut conn).await {
            Ok(holders) => holders,
            Err(e) => {
                warn!("failed to read seat holds for trip {}: {}", trip_id, e);
                return Vec::new();
            }
        };

        seats
            .iter()
            .zip(holders)
            .filter_map(|(seat, holder)| match holder {
                Some(holder) if Some(holder) != viewer => Some(seat.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Holds every seat for `user_id`, or none of them.
    ///
    /// Seats the same user already holds get their TTL refreshed. Holds taken
    /// by this call are given back on conflict and on Redis errors alike.
    pub async fn hold_seats(
        &self,
        trip_id: i64,
        seats: &[SeatId],
        user_id: i64,
        ttl_seconds: u64,
    ) -> Result<HoldOutcome, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let mut acquired = Vec::new();
        let mut conflicts = Vec::new();
        let mut failure = None;

        for seat in seats {
            let key = hold_key(trip_id, seat.as_str());
            match claim_seat(&mut conn, &key, user_id, ttl_seconds).await {
                Ok(SeatClaim::Acquired) => acquired.push(key),
                Ok(SeatClaim::AlreadyOwn) => {}
                Ok(SeatClaim::HeldByOther) => conflicts.push(seat.to_string()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() && conflicts.is_empty() {
            return Ok(HoldOutcome::Held);
        }

        if !acquired.is_empty() {
            if let Err(e) = conn.del::<_, ()>(&acquired).await {
                warn!("failed to roll back {} seat holds for trip {}: {}", acquired.len(), trip_id, e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(HoldOutcome::Conflict(conflicts)),
        }
    }

    pub async fn release_seats(&self, trip_id: i64, seats: &[String]) {
        if seats.is_empty() {
            return;
        }
        let keys: Vec<String> = seats.iter().map(|seat| hold_key(trip_id, seat)).collect();
        let mut conn = self.redis.conn.clone();
        if let Err(e) = conn.del::<_, ()>(keys).await {
            warn!("failed to release seat holds for trip {}: {}", trip_id, e);
        }
    }

    pub async fn invalidate_trip_seats(&self, trip_id: i64) {
        self.delete(&booked_key(trip_id)).await;
        self.invalidate_trip_searches().await;
        info!("Invalidated seat cache for trip {}", trip_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::Database, redis_client::RedisClient};
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn keys_are_scoped_per_trip() {
        assert_eq!(booked_key(7), "trip:7:booked");
        assert_eq!(hold_key(7, "B2"), "trip:7:seat:B2:hold");
        assert_ne!(hold_key(7, "B2"), hold_key(8, "B2"));
    }

    async fn redis_cache(url: &str) -> CacheService {
        let redis = RedisClient::connect(url).await.unwrap();
        // Hold operations never touch Postgres
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/unused")
            .unwrap();
        CacheService::new(redis, Database { pool })
    }

    fn row_a(columns: &[u32]) -> Vec<SeatId> {
        columns.iter().map(|column| SeatId::new("A", *column)).collect()
    }

    async fn holder_of(cache: &CacheService, trip_id: i64, seat: &str) -> Option<i64> {
        let mut conn = cache.redis.conn.clone();
        conn.get(hold_key(trip_id, seat)).await.unwrap()
    }

    #[tokio::test]
    async fn hold_is_all_or_nothing() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let cache = redis_cache(&url).await;
        // Negative ids never collide with real trips
        let trip_id = -1 - i64::from(uuid::Uuid::new_v4().as_u128() as u32);

        let first = cache.hold_seats(trip_id, &row_a(&[2]), 1, 60).await.unwrap();
        assert_eq!(first, HoldOutcome::Held);

        let second = cache.hold_seats(trip_id, &row_a(&[1, 2]), 2, 60).await.unwrap();
        assert_eq!(second, HoldOutcome::Conflict(vec!["A2".to_string()]));
        assert_eq!(holder_of(&cache, trip_id, "A1").await, None);
        assert_eq!(holder_of(&cache, trip_id, "A2").await, Some(1));

        // Own holds are refreshed, not reported as conflicts
        let again = cache.hold_seats(trip_id, &row_a(&[2, 3]), 1, 60).await.unwrap();
        assert_eq!(again, HoldOutcome::Held);
        assert_eq!(holder_of(&cache, trip_id, "A3").await, Some(1));

        cache
            .release_seats(trip_id, &["A1".to_string(), "A2".to_string(), "A3".to_string()])
            .await;
        assert_eq!(holder_of(&cache, trip_id, "A2").await, None);
    }
}
