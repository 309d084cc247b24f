use crate::cache::CacheService;
use crate::middleware::AuthUser;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::info;

const AUTH_TTL_SECONDS: u64 = 300;

/// The raw password never reaches Redis, only its digest.
fn auth_key(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("auth:{}:{:x}", email.to_lowercase(), hasher.finalize())
}

/// KEYS pattern matching every cached session of `email`.
fn user_auth_pattern(email: &str) -> String {
    let mut pattern = String::from("auth:");
    for c in email.to_lowercase().chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

impl CacheService {
    pub async fn cache_auth_user(&self, email: &str, password: &str, user: &AuthUser) {
        self.put_json(&auth_key(email, password), user, AUTH_TTL_SECONDS).await;
    }

    pub async fn get_cached_auth_user(&self, email: &str, password: &str) -> Option<AuthUser> {
        self.get_json(&auth_key(email, password)).await
    }

    /// Drops every cached session of the user, e.g. after a role change.
    pub async fn invalidate_user_auth(&self, email: &str) {
        let pattern = user_auth_pattern(email);
        let mut conn = self.redis.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();
        if !keys.is_empty() {
            let _: Result<(), _> = conn.del(keys).await;
            info!("Invalidated cached sessions for {}", email);
        }
    }
}
