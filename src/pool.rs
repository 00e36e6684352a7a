//! Bounded worker pool shared by every archive of a run.
//!
//! The pool is a cloneable handle around a FIFO-fair semaphore. Every codec
//! invocation holds one [`WorkerSlot`] for its whole duration, so the number
//! of concurrent invocations never exceeds the pool size, process wide.
//! Waiting acquisitions are admitted in request order; none of them starves.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::Result;

#[derive(Debug)]
struct PoolState {
    semaphore: Semaphore,
    size: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Handle to the shared pool; clones refer to the same slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    state: Arc<PoolState>,
}

/// An occupied execution slot. The slot is released when dropped.
#[derive(Debug)]
pub struct WorkerSlot<'a> {
    _permit: SemaphorePermit<'a>,
    state: &'a PoolState,
}

impl WorkerPool {
    /// Creates a pool with `size` slots (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            state: Arc::new(PoolState {
                semaphore: Semaphore::new(size),
                size,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for a free slot.
    ///
    /// Fails with [`Error::Semaphore`](crate::error::Error::Semaphore) once the
    /// pool has been [closed](WorkerPool::close).
    pub async fn acquire(&self) -> Result<WorkerSlot<'_>> {
        let permit = self.state.semaphore.acquire().await?;
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        log::trace!("worker slot taken ({}/{})", now, self.state.size);
        Ok(WorkerSlot {
            _permit: permit,
            state: &self.state,
        })
    }

    /// Runs `task` while holding a slot.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _slot = self.acquire().await?;
        Ok(task.await)
    }

    /// Stops admitting work. Pending and future acquisitions fail; running
    /// tasks keep their slots until they finish.
    pub fn close(&self) {
        self.state.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.semaphore.is_closed()
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.state.size
    }

    /// Slots currently taken.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever taken at the same time.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Number of slots released so far.
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }
}
