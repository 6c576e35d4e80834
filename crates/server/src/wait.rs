use std::future::Future;
use std::time::Duration;

/// The condition never held within the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotReady {
    pub attempts: u32,
}

/// Poll `ready` every `interval`, at most `attempts` times.
pub async fn wait_until<F, Fut>(mut ready: F, interval: Duration, attempts: u32) -> Result<u32, NotReady>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=attempts {
        if ready().await {
            return Ok(attempt);
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(NotReady { attempts })
}
