//! Expectation polling for eventually-consistent reads.
//!
//! The projection gives callers of the delivery function no read-after-write
//! guarantee; a test that wants to observe a write polls the read side with a
//! bounded retry. That is exactly what [`eventually`] does.

#![allow(clippy::panic)] // Test helper fails the test on timeout by design

use std::future::Future;
use std::time::Duration;

/// Poll `probe` until it yields `Some`, with a default budget of 50 attempts
/// 20 ms apart.
///
/// # Example
///
/// ```ignore
/// let progress = eventually(|| {
///     let engine = Arc::clone(&engine);
///     async move {
///         engine.find_by_learning_materials_id("lm-1").await.ok().flatten()
///     }
/// })
/// .await;
/// ```
///
/// # Panics
///
/// Panics (failing the test) if the probe never yields `Some` within the
/// retry budget.
pub async fn eventually<T, F, Fut>(probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    eventually_with(50, Duration::from_millis(20), probe).await
}

/// Poll `probe` until it yields `Some`, with an explicit retry budget.
///
/// # Panics
///
/// Panics (failing the test) if the probe never yields `Some` within
/// `attempts` tries.
pub async fn eventually_with<T, F, Fut>(attempts: usize, interval: Duration, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..attempts {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("expectation not met within {attempts} attempts ({interval:?} apart)");
}
