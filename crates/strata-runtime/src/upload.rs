use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use strata_mesh::{CompiledChunk, RenderLayer};
use strata_world::ChunkCoord;

use crate::GpuUploader;
use crate::builder_pool::PooledBuilders;
use crate::chunks::ChunkSlot;
use crate::error::{BuildError, panic_message};
use crate::task::{BuildTask, TaskStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LayerOutcome {
    Uploaded,
    Skipped,
    Failed,
}

/// The deferred uploads of one built chunk, sharing its builder.
///
/// The builder goes back to the pool when the last layer settles or when the
/// task is cancelled, whichever comes first.
pub(crate) struct UploadBatch {
    task: Arc<BuildTask>,
    slot: Option<Arc<ChunkSlot>>,
    compiled: Arc<CompiledChunk>,
    builders: Mutex<Option<PooledBuilders>>,
    remaining: AtomicUsize,
    incomplete: AtomicBool,
}

impl UploadBatch {
    pub(crate) fn new(
        task: Arc<BuildTask>,
        slot: Option<Arc<ChunkSlot>>,
        compiled: CompiledChunk,
        builders: PooledBuilders,
        layers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            task,
            slot,
            compiled: Arc::new(compiled),
            builders: Mutex::new(Some(builders)),
            remaining: AtomicUsize::new(layers),
            incomplete: AtomicBool::new(false),
        })
    }

    /// Give the builder back early. Never waits on an upload in progress;
    /// in that case the final layer releases it instead.
    pub(crate) fn release_early(&self) {
        let taken = match self.builders.try_lock() {
            Ok(mut b) => b.take(),
            Err(_) => None,
        };
        drop(taken);
    }

    fn release(&self) {
        let taken = self
            .builders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(taken);
    }

    fn settle(&self, outcome: LayerOutcome) {
        if outcome != LayerOutcome::Uploaded {
            self.incomplete.store(true, Ordering::Release);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.release();
        let coord = self.task.coord();
        if self.incomplete.load(Ordering::Acquire) {
            if self.task.finish() {
                log::debug!(target: "pipeline", "upload for {} did not complete; task finished", coord);
            }
            return;
        }
        let result = self.task.complete(|| {
            if let Some(slot) = &self.slot {
                slot.publish(Arc::clone(&self.compiled));
            }
        });
        match result {
            Ok(()) => {}
            Err(TaskStatus::Finished) => {
                log::debug!(target: "pipeline", "chunk {} was cancelled during upload", coord);
            }
            Err(found) => {
                log::warn!(target: "pipeline", "chunk {} was {:?} when uploads finished, expected uploading", coord, found);
            }
        }
    }
}

/// One layer waiting for the graphics thread.
pub(crate) struct PendingUpload {
    seq: u64,
    priority: f64,
    layer: RenderLayer,
    batch: Option<Arc<UploadBatch>>,
}

impl PendingUpload {
    pub(crate) fn coord(&self) -> Option<ChunkCoord> {
        self.batch.as_ref().map(|b| b.task.coord())
    }

    /// Upload this layer. An error here is fatal to the pipeline.
    pub(crate) fn run(mut self, gpu: &mut dyn GpuUploader) -> Result<(), BuildError> {
        let Some(batch) = self.batch.take() else {
            return Ok(());
        };
        if batch.task.status() != TaskStatus::Uploading {
            batch.settle(LayerOutcome::Skipped);
            return Ok(());
        }
        let coord = batch.task.coord();
        let layer = self.layer;
        let result = {
            let guard = batch.builders.lock().unwrap_or_else(|e| e.into_inner());
            // A cancel may have landed while waiting for the builders.
            match guard.as_ref() {
                Some(_) if batch.task.status() != TaskStatus::Uploading => None,
                Some(b) => Some(catch_unwind(AssertUnwindSafe(|| {
                    gpu.upload(coord, layer, b.layer(layer))
                }))),
                None => None,
            }
        };
        match result {
            None => {
                batch.settle(LayerOutcome::Skipped);
                Ok(())
            }
            Some(Ok(Ok(()))) => {
                batch.settle(LayerOutcome::Uploaded);
                Ok(())
            }
            Some(Ok(Err(e))) => {
                batch.settle(LayerOutcome::Failed);
                Err(BuildError::Upload(e))
            }
            Some(Err(payload)) => {
                batch.settle(LayerOutcome::Failed);
                Err(BuildError::Panicked(panic_message(payload.as_ref())))
            }
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        // Never ran: counts as cancelled so the batch still settles.
        if let Some(batch) = self.batch.take() {
            batch.settle(LayerOutcome::Skipped);
        }
    }
}

impl fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpload")
            .field("seq", &self.seq)
            .field("priority", &self.priority)
            .field("layer", &self.layer)
            .field("coord", &self.coord())
            .finish()
    }
}

impl PartialEq for PendingUpload {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for PendingUpload {}

impl PartialOrd for PendingUpload {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingUpload {
    // BinaryHeap is a max-heap; invert so the lowest priority, then oldest, pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct UploadInner {
    heap: BinaryHeap<PendingUpload>,
    closed: bool,
}

/// Priority queue of layer uploads, drained on the graphics thread.
pub(crate) struct UploadQueue {
    inner: Mutex<UploadInner>,
    seq: AtomicU64,
}

impl UploadQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(UploadInner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            seq: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UploadInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn make(&self, batch: &Arc<UploadBatch>, layer: RenderLayer) -> PendingUpload {
        PendingUpload {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            priority: batch.task.priority(),
            layer,
            batch: Some(Arc::clone(batch)),
        }
    }

    /// Hands the upload back if the queue is closed.
    pub(crate) fn push(&self, upload: PendingUpload) -> Result<(), PendingUpload> {
        let mut q = self.lock();
        if q.closed {
            return Err(upload);
        }
        q.heap.push(upload);
        Ok(())
    }

    pub(crate) fn pop(&self) -> Option<PendingUpload> {
        self.lock().heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Refuse further pushes and hand back what was queued, to be dropped
    /// by the caller outside the lock.
    pub(crate) fn close(&self) -> Vec<PendingUpload> {
        let mut q = self.lock();
        q.closed = true;
        std::mem::take(&mut q.heap).into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder_pool::BuilderPool;
    use crate::error::UploadError;
    use strata_mesh::{BuildKind, LayerBuffer};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(ChunkCoord, RenderLayer)>,
        fail: bool,
    }

    impl GpuUploader for Recorder {
        fn upload(
            &mut self,
            coord: ChunkCoord,
            layer: RenderLayer,
            _geometry: &LayerBuffer,
        ) -> Result<(), UploadError> {
            if self.fail {
                return Err(UploadError::new("device lost"));
            }
            self.calls.push((coord, layer));
            Ok(())
        }
    }

    fn uploading_task(id: u64, priority: f64) -> Arc<BuildTask> {
        let t = Arc::new(BuildTask::new(
            id,
            ChunkCoord::new(id as i32, 0, 0),
            BuildKind::FullRebuild,
            priority,
        ));
        t.begin_compile(|| true).unwrap();
        t.advance(TaskStatus::Compiling, TaskStatus::Uploading).unwrap();
        t
    }

    #[test]
    fn last_layer_completes_task_and_returns_builder() {
        let pool = BuilderPool::new(1);
        let queue = UploadQueue::new();
        let task = uploading_task(1, 5.0);
        let batch = UploadBatch::new(
            task.clone(),
            None,
            CompiledChunk::empty(),
            pool.acquire().unwrap(),
            2,
        );
        queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        queue.push(queue.make(&batch, RenderLayer::Cutout)).unwrap();
        drop(batch);

        let mut gpu = Recorder::default();
        queue.pop().unwrap().run(&mut gpu).unwrap();
        assert_eq!(task.status(), TaskStatus::Uploading);
        assert_eq!(pool.borrowed(), 1);
        queue.pop().unwrap().run(&mut gpu).unwrap();
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(gpu.calls.len(), 2);
    }

    #[test]
    fn cancelled_task_skips_upload_and_frees_builder() {
        let pool = BuilderPool::new(1);
        let queue = UploadQueue::new();
        let task = uploading_task(1, 5.0);
        let batch = UploadBatch::new(task.clone(), None, CompiledChunk::empty(), pool.acquire().unwrap(), 1);
        queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        drop(batch);
        task.finish();

        let mut gpu = Recorder::default();
        queue.pop().unwrap().run(&mut gpu).unwrap();
        assert!(gpu.calls.is_empty());
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn dropped_upload_counts_as_cancelled() {
        let pool = BuilderPool::new(1);
        let queue = UploadQueue::new();
        let task = uploading_task(1, 5.0);
        let batch = UploadBatch::new(task.clone(), None, CompiledChunk::empty(), pool.acquire().unwrap(), 1);
        queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        drop(batch);

        let dropped = queue.close();
        assert_eq!(dropped.len(), 1);
        drop(dropped);
        assert_eq!(pool.borrowed(), 0);
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn upload_error_is_reported() {
        let pool = BuilderPool::new(1);
        let queue = UploadQueue::new();
        let task = uploading_task(1, 5.0);
        let batch = UploadBatch::new(task.clone(), None, CompiledChunk::empty(), pool.acquire().unwrap(), 1);
        queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        drop(batch);

        let mut gpu = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let err = queue.pop().unwrap().run(&mut gpu).unwrap_err();
        assert!(matches!(err, BuildError::Upload(_)));
        assert_eq!(pool.borrowed(), 0);
    }

    #[test]
    fn cancel_while_waiting_for_builders_skips_the_layer() {
        let pool = BuilderPool::new(1);
        let queue = UploadQueue::new();
        let task = uploading_task(1, 5.0);
        let batch = UploadBatch::new(task.clone(), None, CompiledChunk::empty(), pool.acquire().unwrap(), 1);
        queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        let upload = queue.pop().unwrap();

        let gpu = std::thread::scope(|s| {
            let held = batch.builders.lock().unwrap();
            let uploader = s.spawn(move || {
                let mut gpu = Recorder::default();
                upload.run(&mut gpu).unwrap();
                gpu
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            task.finish();
            drop(held);
            uploader.join().unwrap()
        });
        drop(batch);

        assert!(gpu.calls.is_empty());
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(pool.borrowed(), 0);
    }

    #[test]
    fn uploads_pop_in_priority_order() {
        let pool = BuilderPool::new(3);
        let queue = UploadQueue::new();
        for (id, p) in [(1, 30.0), (2, 10.0), (3, 20.0)] {
            let batch = UploadBatch::new(
                uploading_task(id, p),
                None,
                CompiledChunk::empty(),
                pool.acquire().unwrap(),
                1,
            );
            queue.push(queue.make(&batch, RenderLayer::Solid)).unwrap();
        }
        let mut gpu = Recorder::default();
        while let Some(u) = queue.pop() {
            u.run(&mut gpu).unwrap();
        }
        let xs: Vec<i32> = gpu.calls.iter().map(|(c, _)| c.cx).collect();
        assert_eq!(xs, vec![2, 3, 1]);
    }
}
