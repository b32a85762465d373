//! 有上限的重试组合子
//!
//! 每次尝试都是一次独立的新调用，第一次成功即返回；全部失败时返回 None，由调用方决定兜底值。
//! 目前由 Critic 的结构化反思使用；计划节点只调用一次模型，失败即不带计划作答。

use std::fmt::Display;
use std::future::Future;

/// 重试结果：成功值（若有）与实际尝试次数
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: Option<T>,
    pub attempts: usize,
}

impl<T> RetryOutcome<T> {
    pub fn exhausted(&self) -> bool {
        self.value.is_none()
    }

    pub fn unwrap_or(self, fallback: T) -> T {
        self.value.unwrap_or(fallback)
    }
}

/// 最多尝试 cap 次 attempt(n)，n 从 0 开始；cap 为 0 时视为 1
pub async fn retry_with_cap<T, E, F, Fut>(label: &str, cap: usize, mut attempt: F) -> RetryOutcome<T>
where
    E: Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let cap = cap.max(1);
    for n in 0..cap {
        match attempt(n).await {
            Ok(value) => {
                tracing::debug!(label, attempt = n, "retry succeeded");
                return RetryOutcome {
                    value: Some(value),
                    attempts: n + 1,
                };
            }
            Err(e) => {
                tracing::warn!(label, attempt = n, cap, "attempt failed: {}", e);
            }
        }
    }
    tracing::warn!(label, cap, "all attempts exhausted");
    RetryOutcome {
        value: None,
        attempts: cap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_first_success_wins() {
        let calls = AtomicUsize::new(0);
        let outcome = retry_with_cap("t", 5, |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("bad json")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(outcome.value, Some(2));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none_after_cap() {
        let calls = AtomicUsize::new(0);
        let outcome: RetryOutcome<()> = retry_with_cap("t", 5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still bad") }
        })
        .await;

        assert!(outcome.exhausted());
        assert_eq!(outcome.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_zero_cap_tries_once() {
        let outcome = retry_with_cap("t", 0, |_| async { Ok::<_, String>(1) }).await;
        assert_eq!(outcome.attempts, 1);
    }
}
