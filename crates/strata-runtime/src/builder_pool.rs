use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use strata_mesh::RegionBuilders;

use crate::error::Interrupted;

/// Quads preallocated per layer in each pooled builder.
const PREALLOC_QUADS: usize = 1024;

/// Fixed set of scratch build buffers shared by all workers.
///
/// Every buffer is created up front; `acquire` blocks until one is free, which
/// is what bounds the number of chunks in flight between build and upload.
pub struct BuilderPool {
    available_tx: Sender<RegionBuilders>,
    available_rx: Receiver<RegionBuilders>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    capacity: usize,
    borrowed: AtomicUsize,
    peak_borrowed: AtomicUsize,
}

impl BuilderPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = tx.try_send(RegionBuilders::with_capacity(PREALLOC_QUADS));
        }
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Arc::new(Self {
            available_tx: tx,
            available_rx: rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            capacity,
            borrowed: AtomicUsize::new(0),
            peak_borrowed: AtomicUsize::new(0),
        })
    }

    /// Block until a builder is free. Fails once the pool has been closed.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledBuilders, Interrupted> {
        if self.is_closed() {
            return Err(Interrupted);
        }
        if let Ok(b) = self.available_rx.try_recv() {
            return Ok(self.lend(b));
        }
        select! {
            recv(self.available_rx) -> b => b.map(|b| self.lend(b)).map_err(|_| Interrupted),
            recv(self.shutdown_rx) -> _ => Err(Interrupted),
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledBuilders> {
        self.available_rx.try_recv().ok().map(|b| self.lend(b))
    }

    pub fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Option<PooledBuilders> {
        self.available_rx
            .recv_timeout(timeout)
            .ok()
            .map(|b| self.lend(b))
    }

    fn lend(self: &Arc<Self>, builders: RegionBuilders) -> PooledBuilders {
        let now = self.borrowed.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_borrowed.fetch_max(now, Ordering::AcqRel);
        PooledBuilders {
            builders: Some(builders),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut builders: RegionBuilders) {
        builders.reset();
        self.borrowed.fetch_sub(1, Ordering::AcqRel);
        let _ = self.available_tx.try_send(builders);
    }

    /// Wake every blocked `acquire` with `Interrupted`.
    pub fn close(&self) {
        if let Ok(mut tx) = self.shutdown_tx.lock() {
            tx.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.shutdown_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }

    /// Drop every idle builder, returning how many were reclaimed.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.available_rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.available_rx.len()
    }

    #[inline]
    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn peak_borrowed(&self) -> usize {
        self.peak_borrowed.load(Ordering::Acquire)
    }
}

/// A borrowed builder; goes back to the pool, cleared, when dropped.
pub struct PooledBuilders {
    builders: Option<RegionBuilders>,
    pool: Arc<BuilderPool>,
}

impl Deref for PooledBuilders {
    type Target = RegionBuilders;

    fn deref(&self) -> &Self::Target {
        self.builders.as_ref().expect("builders already released")
    }
}

impl DerefMut for PooledBuilders {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.builders.as_mut().expect("builders already released")
    }
}

impl Drop for PooledBuilders {
    fn drop(&mut self) {
        if let Some(b) = self.builders.take() {
            self.pool.release(b);
        }
    }
}
