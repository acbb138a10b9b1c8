//! Bounded memory for producer record batches.
//!
//! The pool hands out [`PooledBuffer`]s against a fixed byte budget.
//! Callers that would exceed the budget wait up to `max_block` for other
//! buffers to be returned, then fail with [`Error::BufferExhausted`].
//!
//! A buffer owns its reservation: returning it releases exactly the bytes
//! it was allocated with, whatever happened to its capacity in between.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use kafkaesque_client::buffer_pool::BufferPool;
//!
//! # async fn run() -> kafkaesque_client::Result<()> {
//! let pool = BufferPool::new(32 * 1024 * 1024);
//! let mut buffer = pool.allocate(16 * 1024, Duration::from_millis(60_000)).await?;
//! buffer.extend_from_slice(b"record batch");
//! pool.deallocate(buffer);
//! # Ok(())
//! # }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Byte-budgeted allocator. Permits of the inner semaphore are bytes.
#[derive(Debug)]
pub struct BufferPool {
    total: usize,
    permits: Arc<Semaphore>,
    waiters: AtomicUsize,
}

/// A buffer holding `reserved()` bytes of its pool's budget until dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: BytesMut,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledBuffer {
    /// Bytes of the pool budget this buffer holds.
    pub fn reserved(&self) -> usize {
        self.permit.as_ref().map_or(0, |p| p.num_permits())
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

/// Decrements the waiter count even when the allocation future is dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Waiting(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BufferPool {
    pub fn new(total_bytes: usize) -> Self {
        let total = total_bytes.min(Semaphore::MAX_PERMITS);
        Self {
            total,
            permits: Arc::new(Semaphore::new(total)),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Reserve `size` bytes, waiting at most `max_block` for space.
    ///
    /// Requests larger than the whole pool fail immediately.
    pub async fn allocate(&self, size: usize, max_block: Duration) -> Result<PooledBuffer> {
        let exhausted = || Error::BufferExhausted {
            requested: size,
            max_block,
        };
        if size == 0 {
            return Ok(PooledBuffer {
                buffer: BytesMut::new(),
                permit: None,
            });
        }
        if size > self.total {
            return Err(exhausted());
        }
        let count = u32::try_from(size).map_err(|_| exhausted())?;

        let permit = match self.permits.clone().try_acquire_many_owned(count) {
            Ok(permit) => permit,
            Err(_) => {
                let _waiting = Waiting::enter(&self.waiters);
                tracing::debug!(size, available = self.available(), "Waiting for buffer memory");
                let acquire = self.permits.clone().acquire_many_owned(count);
                match tokio::time::timeout(max_block, acquire).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) | Err(_) => {
                        tracing::warn!(size, ?max_block, "Buffer memory exhausted");
                        return Err(exhausted());
                    }
                }
            }
        };
        Ok(PooledBuffer {
            buffer: BytesMut::with_capacity(size),
            permit: Some(permit),
        })
    }

    /// Return a buffer's reservation to the pool. Dropping it does the same.
    pub fn deallocate(&self, buffer: PooledBuffer) {
        tracing::trace!(released = buffer.reserved(), "Buffer returned to pool");
        drop(buffer);
    }

    /// Number of callers blocked in [`allocate`](Self::allocate).
    pub fn queued(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Free bytes.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn total_memory(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_and_deallocate() {
        let pool = BufferPool::new(1024);
        let buffer = pool.allocate(256, Duration::from_millis(10)).await.unwrap();
        assert!(buffer.capacity() >= 256);
        assert_eq!(buffer.reserved(), 256);
        assert_eq!(pool.available(), 768);

        pool.deallocate(buffer);
        assert_eq!(pool.available(), 1024);
    }

    #[tokio::test]
    async fn test_oversized_request_fails_immediately() {
        let pool = BufferPool::new(100);
        let err = pool.allocate(101, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, Error::BufferExhausted { requested: 101, .. }));
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn test_zero_size() {
        let pool = BufferPool::new(10);
        let buffer = pool.allocate(0, Duration::ZERO).await.unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.reserved(), 0);
        assert_eq!(pool.available(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_full() {
        let pool = BufferPool::new(100);
        let _held = pool.allocate(100, Duration::ZERO).await.unwrap();

        let err = pool.allocate(10, Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(
            err,
            Error::BufferExhausted {
                requested: 10,
                max_block: Duration::from_millis(50)
            }
        );
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_allocator_wakes_on_deallocate() {
        let pool = Arc::new(BufferPool::new(100));
        let held = pool.allocate(80, Duration::ZERO).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.allocate(50, Duration::from_secs(5)).await })
        };
        while pool.queued() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.queued(), 1);

        pool.deallocate(held);
        let buffer = waiter.await.unwrap().unwrap();
        assert!(buffer.capacity() >= 50);
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.available(), 50);
    }

    #[tokio::test]
    async fn test_grown_buffer_returns_only_its_reservation() {
        let pool = BufferPool::new(20);
        let mut a = pool.allocate(10, Duration::ZERO).await.unwrap();
        let b = pool.allocate(10, Duration::ZERO).await.unwrap();

        a.extend_from_slice(&[7; 25]);
        assert!(a.capacity() >= 25);
        pool.deallocate(a);
        // b still holds its 10 bytes.
        assert_eq!(pool.available(), 10);

        pool.deallocate(b);
        assert_eq!(pool.available(), 20);
    }

    #[tokio::test]
    async fn test_split_buffer_returns_full_reservation() {
        let pool = BufferPool::new(20);
        let mut a = pool.allocate(10, Duration::ZERO).await.unwrap();
        a.extend_from_slice(&[1; 10]);
        let head = a.split_to(6);
        assert_eq!(head.len(), 6);

        pool.deallocate(a);
        assert_eq!(pool.available(), 20);
    }

    #[tokio::test]
    async fn test_drop_releases_reservation() {
        let pool = BufferPool::new(64);
        {
            let _buffer = pool.allocate(40, Duration::ZERO).await.unwrap();
            assert_eq!(pool.available(), 24);
        }
        assert_eq!(pool.available(), 64);
    }
}
