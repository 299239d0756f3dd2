//! Opt-in retry with exponential backoff around an object store.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use bucketsync_common::{Error, Headers, Result};
use bucketsync_storage::{ListPage, ObjectHead, ObjectStore, PutReceipt};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            // +/- 25%
            capped * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Whether `err` is worth another attempt.
///
/// Transport failures without a status, throttling (429) and server errors
/// (5xx) are transient. Everything else is final.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Remote { status: None, .. } | Error::Io(_) => true,
        Error::Remote {
            status: Some(status),
            ..
        } => *status == 429 || (500..600).contains(status),
        _ => false,
    }
}

/// Runs operations under a [`RetryConfig`].
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying transient errors.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, is_transient).await
    }

    /// Run `operation`, retrying errors accepted by `should_retry`.
    ///
    /// Returns the last error once retries are exhausted.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!(
                            "Operation failed after {} attempts: {}",
                            attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Store decorator retrying transient probe, write and list failures.
///
/// Batched deletes are passed through once.
pub struct RetryStore {
    inner: Arc<dyn ObjectStore>,
    executor: RetryExecutor,
}

impl RetryStore {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn ObjectStore>, config: RetryConfig) -> Self {
        Self {
            inner,
            executor: RetryExecutor::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for RetryStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        self.executor.execute(|| self.inner.head(key)).await
    }

    async fn put(&self, key: &str, body: Vec<u8>, headers: &Headers) -> Result<PutReceipt> {
        self.executor
            .execute(|| self.inner.put(key, body.clone(), headers))
            .await
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        self.executor.execute(|| self.inner.list_page(prefix, token)).await
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        self.inner.delete_batch(keys).await
    }
}
