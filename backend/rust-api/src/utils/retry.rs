use std::time::Duration;

/// Exponential backoff with optional jitter for row store reads.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(800),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

/// Runs `f` until it succeeds, `should_retry` rejects the error, or the
/// attempts run out. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= config.max_attempts || !should_retry(&e) => return Err(e),
            Err(e) => {
                let jitter = config
                    .jitter_max
                    .map(|max| max.as_millis() as u64)
                    .filter(|max| *max > 0)
                    .map(|max| rand::random::<u64>() % (max + 1))
                    .unwrap_or(0);
                let wait = backoff + Duration::from_millis(jitter);
                tracing::warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    config.max_attempts,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;

                attempt += 1;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}
