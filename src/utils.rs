use std::future::Future;
use std::time::Duration;

/// Poll an async predicate at a fixed interval until it reports settled or
/// the attempt budget runs out.
///
/// Returns true if the predicate settled within the budget. Callers decide
/// whether an unsettled result is fatal.
pub async fn poll_until<F, Fut>(interval: Duration, max_attempts: u32, mut settled: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..max_attempts {
        if settled().await {
            return true;
        }
        if attempt + 1 < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}
