//! Retry policies for metadata and coordinator round trips, built on `backon`.
//!
//! Metadata refreshes retry with a *fixed* delay (`retry.backoff.ms`):
//! exponential growth would hold back the first successful refresh after a
//! broker comes back.
//!
//! | Policy | Delay | Retries | Use Case |
//! |--------|-------|---------|----------|
//! | `metadata_policy` | `retry.backoff.ms` | caller | Metadata refresh |
//! | `coordinator_policy` | `retry.backoff.ms` to 1s | 5 | FindCoordinator lookups |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use backon::Retryable;
//! use kafkaesque_client::cluster::retry;
//!
//! async fn example() -> kafkaesque_client::Result<()> {
//!     (|| async { Ok::<_, kafkaesque_client::Error>(()) })
//!         .retry(retry::metadata_policy(Duration::from_millis(100), 3))
//!         .when(|e| e.is_retriable())
//!         .await
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};

use crate::error::{Error, Result};

/// Fixed-delay policy used between metadata refresh attempts.
pub fn metadata_policy(backoff: Duration, max_times: usize) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(backoff)
        .with_max_times(max_times)
}

/// Policy for locating a group coordinator while the group is still loading.
pub fn coordinator_policy(backoff: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(backoff)
        .with_max_delay(backoff.max(Duration::from_secs(1)))
        .with_max_times(5)
        .with_jitter()
}

/// Run `operation` with [`metadata_policy`], retrying only retriable errors.
pub async fn with_metadata_policy<F, Fut, T>(
    operation: F,
    backoff: Duration,
    max_times: usize,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    operation
        .retry(metadata_policy(backoff, max_times))
        .when(Error::is_retriable)
        .notify(|e: &Error, delay: Duration| {
            tracing::debug!(error = %e, ?delay, "Retrying metadata request");
        })
        .await
}
