//! Keyed rate counters with TTL windows.
//!
//! The backing store's atomic check-and-increment is the only contract.
//! When the store is unavailable the limiter fails open: the request is
//! allowed and a warning is logged.

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
}

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Atomically increment the counter for `key` and report whether the
    /// post-increment count is within `limit` for the current window.
    async fn check_and_increment(&self, key: &str, limit: u32, window_secs: u32) -> RateDecision;
}

pub fn ws_user_key(user_id: i64) -> String {
    format!("ws_rate_user_{user_id}")
}

pub fn ws_ip_key(addr: &str) -> String {
    format!("ws_rate_ip_{addr}")
}

pub fn ask_key(user_id: i64) -> String {
    format!("ask_user_{user_id}")
}

pub fn upload_key(user_id: i64) -> String {
    format!("upload_user_{user_id}")
}

pub fn ext_invite_key(user_id: i64) -> String {
    format!("ext_invite_user_{user_id}")
}

/// Counter rows in Postgres; one atomic upsert per check.
pub struct PgRateLimiter {
    pool: sqlx::PgPool,
}

impl PgRateLimiter {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_and_increment(&self, key: &str, limit: u32, window_secs: u32) -> RateDecision {
        match relay_sql::rate_limits::check_and_increment(key, window_secs as i32, &self.pool)
            .await
        {
            Ok(count) => RateDecision {
                allowed: count as u32 <= limit,
                count: count as u32,
                limit,
            },
            Err(err) => {
                tracing::warn!(key, ?err, "rate limit check failed (allowing request)");
                RateDecision {
                    allowed: true,
                    count: 0,
                    limit,
                }
            }
        }
    }
}

/// In-process limiter used by tests and single-node local stacks.
pub struct MemoryRateLimiter {
    counters: std::sync::Mutex<std::collections::HashMap<String, (u32, std::time::Instant)>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            counters: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_increment(&self, key: &str, limit: u32, window_secs: u32) -> RateDecision {
        let now = std::time::Instant::now();
        let window = std::time::Duration::from_secs(window_secs as u64);
        let mut counters = self.counters.lock().unwrap();

        let entry = counters.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= window {
            *entry = (0, now);
        }
        entry.0 += 1;

        RateDecision {
            allowed: entry.0 <= limit,
            count: entry.0,
            limit,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_limit_allows_up_to_and_rejects_past() {
        let limiter = MemoryRateLimiter::new();
        for i in 1..=5 {
            let decision = limiter.check_and_increment("ws_rate_user_1", 5, 60).await;
            assert!(decision.allowed, "attempt {i} should be allowed");
            assert_eq!(decision.count, i);
        }
        for _ in 0..2 {
            let decision = limiter.check_and_increment("ws_rate_user_1", 5, 60).await;
            assert!(!decision.allowed);
        }
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let limiter = MemoryRateLimiter::new();
        assert!(limiter.check_and_increment("ws_rate_user_1", 1, 60).await.allowed);
        assert!(!limiter.check_and_increment("ws_rate_user_1", 1, 60).await.allowed);
        assert!(limiter.check_and_increment("ws_rate_user_2", 1, 60).await.allowed);
        assert!(limiter.check_and_increment("ws_rate_ip_10.0.0.1", 1, 60).await.allowed);
    }
}
