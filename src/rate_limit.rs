//! Named rate limiters with fixed-window counters.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::error::{AuthError, StoreError};

/// The independent limiters an application can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterName {
    Auth,
    Api,
    Upload,
    Search,
    Global,
    Admin,
    PasswordReset,
}

impl LimiterName {
    pub const ALL: [LimiterName; 7] = [
        LimiterName::Auth,
        LimiterName::Api,
        LimiterName::Upload,
        LimiterName::Search,
        LimiterName::Global,
        LimiterName::Admin,
        LimiterName::PasswordReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterName::Auth => "auth",
            LimiterName::Api => "api",
            LimiterName::Upload => "upload",
            LimiterName::Search => "search",
            LimiterName::Global => "global",
            LimiterName::Admin => "admin",
            LimiterName::PasswordReset => "password-reset",
        }
    }

    pub(crate) fn env_key(&self) -> String {
        self.as_str().replace('-', "_").to_uppercase()
    }

    pub fn default_rule(&self) -> LimitRule {
        const MINUTE: u64 = 60;
        let (max_attempts, window_secs) = match self {
            LimiterName::Auth => (5, 15 * MINUTE),
            LimiterName::Api => (100, 15 * MINUTE),
            LimiterName::Upload => (10, 60 * MINUTE),
            LimiterName::Search => (30, MINUTE),
            LimiterName::Global => (1000, 15 * MINUTE),
            LimiterName::Admin => (50, 15 * MINUTE),
            LimiterName::PasswordReset => (3, 60 * MINUTE),
        };
        LimitRule {
            max_attempts,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl fmt::Display for LimiterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt budget within a decay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub max_attempts: u64,
    pub window: Duration,
}

/// Counter state after one increment.
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    pub hits: u64,
    pub resets_in: Duration,
}

/// Backing store for limiter counters.
///
/// `hit` must increment and (on first hit) arm the expiry atomically, so a
/// store shared across processes keeps a single budget per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process counter store.
#[derive(Debug, Default, Clone)]
pub struct MemoryCounterStore {
    windows: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // purge lapsed windows so abandoned keys do not accumulate
        if windows.len() > 4096 {
            windows.retain(|_, (_, resets_at)| *resets_at > now);
        }

        let entry = windows
            .entry(key.to_string())
            .or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;

        Ok(WindowCount {
            hits: entry.0,
            resets_in: entry.1.saturating_duration_since(now),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(())
    }
}

/// The set of named limiters sharing one counter store.
#[derive(Clone)]
pub struct RateLimiters {
    store: Arc<dyn CounterStore>,
    rules: Arc<HashMap<LimiterName, LimitRule>>,
}

impl RateLimiters {
    pub fn new(store: Arc<dyn CounterStore>, rules: HashMap<LimiterName, LimitRule>) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
        }
    }

    pub fn in_memory(rules: HashMap<LimiterName, LimitRule>) -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()), rules)
    }

    pub fn rule(&self, name: LimiterName) -> LimitRule {
        self.rules
            .get(&name)
            .copied()
            .unwrap_or_else(|| name.default_rule())
    }

    /// Count one attempt against `name` for `key`.
    ///
    /// A failing counter store lets the attempt through.
    pub async fn check(&self, name: LimiterName, key: &str) -> Result<(), AuthError> {
        let rule = self.rule(name);
        let counter_key = format!("rl:{}:{}", name, key);

        match self.store.hit(&counter_key, rule.window).await {
            Ok(count) if count.hits > rule.max_attempts => Err(AuthError::RateLimited {
                limiter: name.as_str(),
                retry_after_secs: count.resets_in.as_secs().max(1),
            }),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(limiter = %name, error = %err, "rate limit counter unavailable, allowing request");
                Ok(())
            }
        }
    }

    /// Clear the counter for `key`, e.g. after a successful login.
    pub async fn reset(&self, name: LimiterName, key: &str) {
        let counter_key = format!("rl:{}:{}", name, key);
        if let Err(err) = self.store.reset(&counter_key).await {
            warn!(limiter = %name, error = %err, "failed to reset rate limit counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiters(max_attempts: u64, window: Duration) -> RateLimiters {
        let rules = LimiterName::ALL
            .iter()
            .map(|name| {
                (
                    *name,
                    LimitRule {
                        max_attempts,
                        window,
                    },
                )
            })
            .collect();
        RateLimiters::in_memory(rules)
    }

    #[tokio::test]
    async fn blocks_after_budget_is_spent() {
        let limiters = limiters(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiters.check(LimiterName::Auth, "10.0.0.1").await.unwrap();
        }
        let err = limiters
            .check(LimiterName::Auth, "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { limiter: "auth", .. }));
    }

    #[tokio::test]
    async fn limiters_and_keys_are_independent() {
        let limiters = limiters(1, Duration::from_secs(60));
        limiters.check(LimiterName::Auth, "a").await.unwrap();
        limiters.check(LimiterName::Search, "a").await.unwrap();
        limiters.check(LimiterName::Auth, "b").await.unwrap();
        assert!(limiters.check(LimiterName::Auth, "a").await.is_err());
    }

    #[tokio::test]
    async fn window_decays() {
        let limiters = limiters(1, Duration::from_millis(50));
        limiters.check(LimiterName::Api, "k").await.unwrap();
        assert!(limiters.check(LimiterName::Api, "k").await.is_err());
        tokio::time::sleep(Duration::from_millis(80)).await;
        limiters.check(LimiterName::Api, "k").await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let limiters = limiters(1, Duration::from_secs(60));
        limiters.check(LimiterName::Auth, "k").await.unwrap();
        limiters.reset(LimiterName::Auth, "k").await;
        limiters.check(LimiterName::Auth, "k").await.unwrap();
    }

    #[test]
    fn env_keys_are_shell_friendly() {
        assert_eq!(LimiterName::PasswordReset.env_key(), "PASSWORD_RESET");
    }
}
