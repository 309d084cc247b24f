use crate::{database::Database, redis_client::RedisClient};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

pub mod auth;
pub mod search;
pub mod seats;

#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    db: Database,
}

impl CacheService {
    pub fn new(redis: RedisClient, db: Database) -> Self {
        Self { redis, db }
    }

    /// Reads a JSON value; a miss, a Redis failure or a stale shape all read as `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get::<_, Option<String>>(key).await.ok().flatten();
        data.and_then(|data| serde_json::from_str(&data).ok())
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("failed to serialize cache entry {}: {}", key, e);
                return;
            }
        };
        let mut conn = self.redis.conn.clone();
        if let Err(e) = conn.set_ex::<_, _, ()>(key, data, ttl_seconds).await {
            tracing::warn!("failed to write cache entry {}: {}", key, e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut conn = self.redis.conn.clone();
        let _: Result<(), _> = conn.del(key).await;
    }
}
