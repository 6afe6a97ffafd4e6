//! Per-user link issuance limits over aligned 5-minute, hourly and daily
//! windows.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use chunkgate_core::WindowKind;
use chunkgate_state::{KeyKind, StateError, StateKey, StateStore};

use crate::error::GatewayError;

/// Maximum links per user in each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_5min: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_5min: 1,
            per_hour: 5,
            per_day: 20,
        }
    }
}

impl RateLimits {
    /// Limit applying to `window`.
    #[must_use]
    pub fn limit(&self, window: WindowKind) -> u32 {
        match window {
            WindowKind::FiveMinutes => self.per_5min,
            WindowKind::Hour => self.per_hour,
            WindowKind::Day => self.per_day,
        }
    }
}

/// Window counters stored in the state store.
///
/// Each `(user, window kind, window start)` tuple owns one counter that is
/// only ever incremented. Counters of past windows are left in place.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<dyn StateStore>,
    namespace: String,
    limits: RateLimits,
    timezone: Option<Tz>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("namespace", &self.namespace)
            .field("limits", &self.limits)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter. Day windows start at midnight in `timezone`, or in
    /// the host's local zone when `None`.
    pub fn new(
        state: Arc<dyn StateStore>,
        namespace: impl Into<String>,
        limits: RateLimits,
        timezone: Option<Tz>,
    ) -> Self {
        Self {
            state,
            namespace: namespace.into(),
            limits,
            timezone,
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Start and end (exclusive) of the window containing `now`, as epoch
    /// seconds.
    pub fn window_bounds(&self, window: WindowKind, now: DateTime<Utc>) -> (i64, i64) {
        match self.timezone {
            Some(tz) => {
                let local = now.with_timezone(&tz);
                (
                    window.window_start(&local).timestamp(),
                    window.next_window_start(&local).timestamp(),
                )
            }
            None => {
                let local = now.with_timezone(&Local);
                (
                    window.window_start(&local).timestamp(),
                    window.next_window_start(&local).timestamp(),
                )
            }
        }
    }

    fn counter_key(&self, user_id: &str, window: WindowKind, window_start: i64) -> StateKey {
        StateKey::new(
            self.namespace.as_str(),
            KeyKind::RateLimit,
            format!("{user_id}:{}:{window_start}", window.label()),
        )
    }

    /// Current count for the user's window containing `now`. Absent counters
    /// count as zero.
    pub async fn count_at(
        &self,
        user_id: &str,
        window: WindowKind,
        now: DateTime<Utc>,
    ) -> Result<u64, GatewayError> {
        let (start, _) = self.window_bounds(window, now);
        let key = self.counter_key(user_id, window, start);
        let Some(raw) = self.state.get(&key).await? else {
            return Ok(0);
        };
        let count = raw.trim().parse::<i64>().map_err(|e| {
            StateError::Serialization(format!("rate-limit counter {}: {e}", key.canonical()))
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Whether one more link fits in the user's window containing `now`.
    pub async fn check_limit_at(
        &self,
        user_id: &str,
        window: WindowKind,
        max_allowed: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, GatewayError> {
        let count = self.count_at(user_id, window, now).await?;
        Ok(count < u64::from(max_allowed))
    }

    /// [`check_limit_at`](Self::check_limit_at) at the current time.
    pub async fn check_limit(
        &self,
        user_id: &str,
        window: WindowKind,
        max_allowed: u32,
    ) -> Result<bool, GatewayError> {
        self.check_limit_at(user_id, window, max_allowed, Utc::now())
            .await
    }

    /// Atomically add one to the user's window containing `now`. Returns the
    /// new count.
    pub async fn increment_at(
        &self,
        user_id: &str,
        window: WindowKind,
        now: DateTime<Utc>,
    ) -> Result<i64, GatewayError> {
        let (start, _) = self.window_bounds(window, now);
        let key = self.counter_key(user_id, window, start);
        Ok(self.state.increment(&key, 1).await?)
    }

    /// [`increment_at`](Self::increment_at) at the current time.
    pub async fn increment(&self, user_id: &str, window: WindowKind) -> Result<i64, GatewayError> {
        self.increment_at(user_id, window, Utc::now()).await
    }

    /// Admit one link issuance for `user_id` at `now`.
    ///
    /// Every window is checked before any counter moves; only when all three
    /// have room are the three counters incremented.
    #[instrument(name = "limiter.admit", skip_all, fields(%user_id))]
    pub async fn admit_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), GatewayError> {
        for window in WindowKind::ALL {
            let limit = self.limits.limit(window);
            if !self.check_limit_at(user_id, window, limit, now).await? {
                let (_, next) = self.window_bounds(window, now);
                let retry_after_secs = u64::try_from(next - now.timestamp()).unwrap_or(0).max(1);
                debug!(%window, limit, retry_after_secs, "rate limit reached");
                return Err(GatewayError::RateLimitExceeded {
                    window,
                    limit,
                    retry_after_secs,
                });
            }
        }
        for window in WindowKind::ALL {
            self.increment_at(user_id, window, now).await?;
        }
        Ok(())
    }

    /// [`admit_at`](Self::admit_at) at the current time.
    pub async fn admit(&self, user_id: &str) -> Result<(), GatewayError> {
        self.admit_at(user_id, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use chunkgate_state_memory::MemoryStateStore;

    use super::*;

    fn limiter_with(limits: RateLimits) -> (RateLimiter, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let limiter = RateLimiter::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            "test",
            limits,
            Some(chrono_tz::Europe::Berlin),
        );
        (limiter, store)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 12, h, m, s).unwrap()
    }

    #[test]
    fn five_minute_bounds_align_to_multiples_of_five() {
        let (limiter, _) = limiter_with(RateLimits::default());
        let (start, end) = limiter.window_bounds(WindowKind::FiveMinutes, at(10, 17, 42));
        assert_eq!(start, at(10, 15, 0).timestamp());
        assert_eq!(end, at(10, 20, 0).timestamp());
    }

    #[test]
    fn day_bounds_follow_configured_zone() {
        let (limiter, _) = limiter_with(RateLimits::default());
        // 23:30 UTC on 12 March is 00:30 on 13 March in Berlin (UTC+1).
        let (start, end) = limiter.window_bounds(WindowKind::Day, at(23, 30, 0));
        assert_eq!(start, at(23, 0, 0).timestamp());
        assert_eq!(end, (at(23, 0, 0) + TimeDelta::days(1)).timestamp());
    }

    #[tokio::test]
    async fn max_allowed_succeed_then_check_fails() {
        let (limiter, _) = limiter_with(RateLimits::default());
        let now = at(9, 1, 0);
        for _ in 0..3 {
            assert!(
                limiter
                    .check_limit_at("alice", WindowKind::Hour, 3, now)
                    .await
                    .unwrap()
            );
            limiter.increment_at("alice", WindowKind::Hour, now).await.unwrap();
        }
        assert!(
            !limiter
                .check_limit_at("alice", WindowKind::Hour, 3, now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn rollover_starts_fresh_counter_and_keeps_old_one() {
        let (limiter, store) = limiter_with(RateLimits::default());
        let now = at(9, 4, 0);
        limiter.admit_at("bob", now).await.unwrap();

        let err = limiter
            .admit_at("bob", now + TimeDelta::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RateLimitExceeded {
                window: WindowKind::FiveMinutes,
                limit: 1,
                ..
            }
        ));

        let later = at(9, 5, 0);
        assert_eq!(
            limiter.count_at("bob", WindowKind::FiveMinutes, later).await.unwrap(),
            0
        );
        limiter.admit_at("bob", later).await.unwrap();

        let old = store
            .scan_keys("test", KeyKind::RateLimit, Some("bob:5min:"))
            .await
            .unwrap();
        assert_eq!(old.len(), 2);
    }

    #[tokio::test]
    async fn refusal_reports_time_to_rollover() {
        let (limiter, _) = limiter_with(RateLimits::default());
        limiter.admit_at("carol", at(9, 0, 0)).await.unwrap();
        let err = limiter.admit_at("carol", at(9, 3, 20)).await.unwrap_err();
        match err {
            GatewayError::RateLimitExceeded {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 100),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn hourly_limit_applies_across_five_minute_windows() {
        let (limiter, _) = limiter_with(RateLimits::default());
        for i in 0..5 {
            limiter.admit_at("dave", at(9, i * 5, 0)).await.unwrap();
        }
        let err = limiter.admit_at("dave", at(9, 30, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::RateLimitExceeded {
                window: WindowKind::Hour,
                limit: 5,
                ..
            }
        ));
        limiter.admit_at("dave", at(10, 0, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn refused_admission_increments_nothing() {
        let (limiter, _) = limiter_with(RateLimits {
            per_5min: 10,
            per_hour: 10,
            per_day: 1,
        });
        let now = at(12, 0, 0);
        limiter.admit_at("erin", now).await.unwrap();
        assert!(limiter.admit_at("erin", now).await.is_err());

        assert_eq!(
            limiter.count_at("erin", WindowKind::FiveMinutes, now).await.unwrap(),
            1
        );
        assert_eq!(limiter.count_at("erin", WindowKind::Hour, now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_local_hour_uses_separate_windows() {
        let (limiter, _) = limiter_with(RateLimits::default());
        // 02:31 Berlin time occurs twice on 2024-10-27: in CEST, then in CET.
        let first = Utc.with_ymd_and_hms(2024, 10, 27, 0, 31, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 10, 27, 1, 31, 0).unwrap();

        for now in [first, second] {
            for window in [WindowKind::FiveMinutes, WindowKind::Hour] {
                let (start, end) = limiter.window_bounds(window, now);
                assert!(start <= now.timestamp() && now.timestamp() < end);
            }
        }

        limiter.admit_at("gina", first).await.unwrap();
        limiter.admit_at("gina", second).await.unwrap();
        assert_eq!(
            limiter.count_at("gina", WindowKind::FiveMinutes, second).await.unwrap(),
            1
        );
        assert_eq!(limiter.count_at("gina", WindowKind::Day, second).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn users_are_independent() {
        let (limiter, _) = limiter_with(RateLimits::default());
        let now = at(8, 0, 0);
        limiter.admit_at("u1", now).await.unwrap();
        limiter.admit_at("u2", now).await.unwrap();
        assert!(limiter.admit_at("u1", now).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let (limiter, _) = limiter_with(RateLimits::default());
        let now = at(8, 0, 0);
        let futures: Vec<_> = (0..20)
            .map(|_| limiter.increment_at("frank", WindowKind::Day, now))
            .collect();
        for result in futures::future::join_all(futures).await {
            result.unwrap();
        }
        assert_eq!(limiter.count_at("frank", WindowKind::Day, now).await.unwrap(), 20);
    }
}
