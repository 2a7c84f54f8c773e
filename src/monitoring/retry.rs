//! Upstream Retry Strategy
//!
//! 上流 API 呼び出しの指数バックオフ再試行

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// 指数バックオフによる再試行ポリシー
///
/// Only errors for which [`Error::is_retryable`] holds are retried; the
/// total number of calls never exceeds `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_exponential()
    }
}

impl RetryPolicy {
    /// デフォルトの指数バックオフ戦略
    pub fn default_exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// 再試行しないポリシー
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default_exponential()
        }
    }

    /// `attempt` 回目の失敗後に待機する時間（1 始まり）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// 再試行可能な操作を実行
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    info!(
                        "Retrying {} with exponential backoff (attempt {}/{}), delay: {:?}",
                        operation_name, attempt, max_attempts, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            "{} still throttled after {} attempts, giving up",
                            operation_name, max_attempts
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Validation used by the configuration layer
pub(crate) fn validate(policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(Error::Config("retry.max_attempts must be at least 1".into()));
    }
    if policy.multiplier < 1.0 {
        return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
    }
    Ok(())
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
