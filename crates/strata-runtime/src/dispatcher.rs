use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};
use strata_mesh::{BuildKind, CompiledChunk, Mesher, RegionBuilders};
use strata_world::{ChunkCoord, ChunkSource};

use crate::GpuUploader;
use crate::builder_pool::BuilderPool;
use crate::chunks::{ChunkSlot, ChunkTable};
use crate::config::PipelineConfig;
use crate::error::{BuildError, CrashLatch, CrashReport, PipelineError, panic_message};
use crate::parked::ParkedTasks;
use crate::sizing::PoolSizing;
use crate::task::{BuildTask, TaskStatus};
use crate::task_queue::TaskQueue;
use crate::upload::UploadQueue;
use crate::worker::Worker;

/// Collaborators the pipeline reads from; passed in rather than looked up.
#[derive(Clone)]
pub struct PipelineContext {
    pub world: Arc<dyn ChunkSource>,
    pub mesher: Arc<dyn Mesher>,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Queued(Arc<BuildTask>),
    /// An equivalent request is already in flight, or there is nothing to resort.
    Coalesced,
    /// The pipeline has stopped or crashed.
    Rejected,
}

impl SubmitOutcome {
    pub fn task(&self) -> Option<&Arc<BuildTask>> {
        match self {
            SubmitOutcome::Queued(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub pending_tasks: usize,
    pub parked_tasks: usize,
    pub pending_uploads: usize,
    pub free_builders: usize,
    pub borrowed_builders: usize,
    pub peak_borrowed_builders: usize,
    pub builder_capacity: usize,
    pub worker_threads: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    pub cancelled_tasks: usize,
    pub dropped_uploads: usize,
    pub reclaimed_builders: usize,
}

/// State shared by the dispatcher and every worker.
pub(crate) struct Shared {
    pub(crate) world: Arc<dyn ChunkSource>,
    pub(crate) mesher: Arc<dyn Mesher>,
    pub(crate) chunk_size: usize,
    pub(crate) edge_guard_sq: f64,
    pub(crate) requeue_on_neighbor_load: bool,
    pub(crate) tasks: Arc<TaskQueue>,
    pub(crate) uploads: UploadQueue,
    pub(crate) pool: Arc<BuilderPool>,
    pub(crate) chunks: ChunkTable,
    pub(crate) parked: Arc<ParkedTasks>,
    observer: RwLock<[f64; 3]>,
    crash: CrashLatch,
}

impl Shared {
    pub(crate) fn observer(&self) -> [f64; 3] {
        match self.observer.read() {
            Ok(p) => *p,
            Err(e) => *e.into_inner(),
        }
    }

    /// Record a fatal error and stop handing out work.
    pub(crate) fn fail(&self, report: CrashReport) -> CrashReport {
        self.crash.record(report.clone());
        for t in self.tasks.close() {
            t.finish();
        }
        self.pool.close();
        report
    }
}

/// Owns the worker threads, queues and builder pool for chunk meshing.
///
/// The thread that constructs the dispatcher is its graphics thread: uploads,
/// immediate builds and single-threaded pumping only run there.
pub struct Dispatcher {
    shared: Arc<Shared>,
    inline: Worker,
    inline_builders: Mutex<RegionBuilders>,
    sizing: PoolSizing,
    threads: Mutex<Option<ThreadPool>>,
    exit_rx: Receiver<()>,
    graphics_thread: ThreadId,
    next_task_id: AtomicU64,
    stopped: AtomicBool,
}

impl Dispatcher {
    pub fn new(ctx: PipelineContext, config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let sizing = PoolSizing::compute(config.memory_budget_bytes, cores)
            .with_overrides(config.worker_threads, config.builder_capacity);

        let shared = Arc::new(Shared {
            world: ctx.world,
            mesher: ctx.mesher,
            chunk_size: config.chunk_size,
            edge_guard_sq: config.edge_guard_distance * config.edge_guard_distance,
            requeue_on_neighbor_load: config.requeue_on_neighbor_load,
            tasks: Arc::new(TaskQueue::new()),
            uploads: UploadQueue::new(),
            pool: BuilderPool::new(sizing.builder_capacity),
            chunks: ChunkTable::default(),
            parked: Arc::new(ParkedTasks::default()),
            observer: RwLock::new([0.0; 3]),
            crash: CrashLatch::default(),
        });

        // Workers hold a sender each; the receiver disconnects once all have exited.
        let (exit_tx, exit_rx) = unbounded::<()>();
        let threads = if sizing.single_threaded() {
            None
        } else {
            let prefix = config.thread_name_prefix.clone();
            let pool = ThreadPoolBuilder::new()
                .num_threads(sizing.worker_threads)
                .thread_name(move |i| format!("{prefix}-{i}"))
                .build()
                .map_err(|e| PipelineError::Spawn(e.to_string()))?;
            for _ in 0..sizing.worker_threads {
                let worker = Worker::new(Arc::clone(&shared));
                let exit = exit_tx.clone();
                pool.spawn(move || {
                    let _exit = exit;
                    worker.run();
                });
            }
            Some(pool)
        };
        drop(exit_tx);

        if sizing.single_threaded() {
            log::info!(
                target: "pipeline",
                "chunk pipeline single-threaded with {} builder(s)",
                sizing.builder_capacity
            );
        } else {
            log::info!(
                target: "pipeline",
                "chunk pipeline: {} worker thread(s), {} builder(s)",
                sizing.worker_threads,
                sizing.builder_capacity
            );
        }

        Ok(Self {
            inline: Worker::new(Arc::clone(&shared)),
            shared,
            inline_builders: Mutex::new(RegionBuilders::new()),
            sizing,
            threads: Mutex::new(threads),
            exit_rx,
            graphics_thread: thread::current().id(),
            next_task_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn sizing(&self) -> PoolSizing {
        self.sizing
    }

    pub fn graphics_thread(&self) -> ThreadId {
        self.graphics_thread
    }

    pub fn is_single_threaded(&self) -> bool {
        self.sizing.single_threaded()
    }

    /// Observer position in world space, used for the edge guard and sorting.
    pub fn set_observer(&self, pos: [f64; 3]) {
        let mut p = self.shared.observer.write().unwrap_or_else(|e| e.into_inner());
        *p = pos;
    }

    fn accepting(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.shared.crash.is_crashed()
    }

    /// Create the task for `coord`, replacing or coalescing with the live one.
    /// Runs under the slot lock.
    fn make_task(
        &self,
        slot: &ChunkSlot,
        current: &mut Option<Arc<BuildTask>>,
        coord: ChunkCoord,
        kind: BuildKind,
        priority: f64,
    ) -> Option<Arc<BuildTask>> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = match kind {
            BuildKind::FullRebuild => {
                if let Some(old) = current.take() {
                    old.finish();
                }
                BuildTask::new(id, coord, kind, priority)
            }
            BuildKind::TransparencyResort => {
                if let Some(t) = current.as_ref() {
                    let status = t.status();
                    if status == TaskStatus::Pending
                        || (t.kind() == BuildKind::FullRebuild && !status.is_terminal())
                    {
                        return None;
                    }
                }
                let previous = slot.compiled().filter(|c| c.has_translucent())?;
                // An in-flight resort is superseded by one for the newer eye.
                if let Some(old) = current.take() {
                    old.finish();
                }
                BuildTask::new(id, coord, kind, priority).with_previous(previous)
            }
        };
        let task = Arc::new(task);
        let queue = Arc::clone(&self.shared.tasks);
        let parked = Arc::clone(&self.shared.parked);
        let (p, id) = (task.priority(), task.id());
        task.add_finish_callback(Box::new(move |_| {
            queue.remove_key(p, id);
            parked.forget(id);
        }));
        *current = Some(Arc::clone(&task));
        Some(task)
    }

    /// Queue a background build. Lower `priority` builds sooner.
    pub fn submit(&self, coord: ChunkCoord, kind: BuildKind, priority: f64) -> SubmitOutcome {
        if !self.accepting() {
            return SubmitOutcome::Rejected;
        }
        let slot = self.shared.chunks.get_or_insert(coord);
        let mut current = slot.lock_task();
        let Some(task) = self.make_task(&slot, &mut current, coord, kind, priority) else {
            return SubmitOutcome::Coalesced;
        };
        match self.shared.tasks.offer(Arc::clone(&task)) {
            Ok(()) => SubmitOutcome::Queued(task),
            Err(task) => {
                task.finish();
                SubmitOutcome::Rejected
            }
        }
    }

    /// Build and upload on the graphics thread before returning.
    /// `Ok(true)` means fresh geometry was published.
    pub fn submit_now(
        &self,
        coord: ChunkCoord,
        kind: BuildKind,
        priority: f64,
        gpu: &mut dyn GpuUploader,
    ) -> Result<bool, PipelineError> {
        self.check_thread()?;
        self.check_crash()?;
        if self.stopped.load(Ordering::Acquire) {
            return Ok(false);
        }
        let slot = self.shared.chunks.get_or_insert(coord);
        let mut current = slot.lock_task();
        let Some(task) = self.make_task(&slot, &mut current, coord, kind, priority) else {
            return Ok(false);
        };
        self.run_inline(&task, gpu)?;
        Ok(task.status() == TaskStatus::Done)
    }

    fn run_inline(&self, task: &Arc<BuildTask>, gpu: &mut dyn GpuUploader) -> Result<(), PipelineError> {
        let mut builders = self.inline_builders.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.inline.process_inline(task, &mut builders, gpu)
        }))
        .unwrap_or_else(|p| Err(BuildError::Panicked(panic_message(p.as_ref()))));
        if let Err(err) = outcome {
            builders.reset();
            task.finish();
            let report = CrashReport::here("Batching chunks", Some(task.coord()), err);
            return Err(PipelineError::Crashed(self.shared.fail(report)));
        }
        Ok(())
    }

    /// Run queued uploads on the graphics thread until the queue is empty or
    /// `deadline` passes; `None` drains fully. In single-threaded mode each
    /// iteration also builds one pending task. Returns whether any work ran.
    pub fn drain_uploads(
        &self,
        gpu: &mut dyn GpuUploader,
        deadline: Option<Instant>,
    ) -> Result<bool, PipelineError> {
        self.check_thread()?;
        self.check_crash()?;
        let mut any = false;
        loop {
            let mut did_work = false;
            if self.sizing.single_threaded() {
                if let Some(task) = self.shared.tasks.poll() {
                    self.run_inline(&task, gpu)?;
                    did_work = true;
                }
            }
            if let Some(upload) = self.shared.uploads.pop() {
                let coord = upload.coord();
                if let Err(err) = upload.run(gpu) {
                    let report = CrashReport::here("Rendering chunk", coord, err);
                    return Err(PipelineError::Crashed(self.shared.fail(report)));
                }
                did_work = true;
            }
            any |= did_work;
            if !did_work || deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }
        Ok(any)
    }

    /// Cancel the live task for `coord`. True if a task was moved to FINISHED.
    pub fn cancel(&self, coord: ChunkCoord) -> bool {
        let Some(slot) = self.shared.chunks.get(coord) else {
            return false;
        };
        let task = slot.lock_task().take();
        task.is_some_and(|t| t.finish())
    }

    /// Cancel and forget a chunk entirely, dropping its published geometry.
    pub fn evict(&self, coord: ChunkCoord) -> Option<Arc<CompiledChunk>> {
        let slot = self.shared.chunks.remove(coord)?;
        if let Some(t) = slot.lock_task().take() {
            t.finish();
        }
        slot.compiled()
    }

    /// Cancel every queued or parked task. In-flight builds are unaffected.
    pub fn clear_pending(&self) -> usize {
        let mut n = 0;
        for t in self.shared.tasks.drain() {
            n += usize::from(t.finish());
        }
        for t in self.shared.parked.drain() {
            n += usize::from(t.finish());
        }
        n
    }

    /// Clear pending work and wait, uploading as needed, until every builder is idle.
    pub fn quiesce(&self, gpu: &mut dyn GpuUploader) -> Result<(), PipelineError> {
        self.check_thread()?;
        self.clear_pending();
        let pool = &self.shared.pool;
        let mut held = Vec::with_capacity(pool.capacity());
        while held.len() < pool.capacity() {
            self.drain_uploads(gpu, None)?;
            match pool.acquire_timeout(Duration::from_millis(5)) {
                Some(b) => held.push(b),
                None if pool.is_closed() && self.shared.uploads.is_empty() => break,
                None => {}
            }
        }
        log::debug!(target: "pipeline", "quiesced with {} builder(s) reclaimed", held.len());
        Ok(())
    }

    /// Re-offer tasks that were parked waiting on column `(cx, cz)`.
    /// Call after the world reports the column as loaded.
    pub fn notify_chunk_loaded(&self, cx: i32, cz: i32) -> usize {
        let mut requeued = 0;
        for t in self.shared.parked.take_column((cx, cz)) {
            if t.status() != TaskStatus::Pending {
                continue;
            }
            match self.shared.tasks.offer(t) {
                Ok(()) => requeued += 1,
                Err(t) => {
                    t.finish();
                }
            }
        }
        if requeued > 0 {
            log::debug!(target: "pipeline", "column ({}, {}) loaded; requeued {} task(s)", cx, cz, requeued);
        }
        requeued
    }

    pub fn compiled(&self, coord: ChunkCoord) -> Option<Arc<CompiledChunk>> {
        self.shared.chunks.get(coord)?.compiled()
    }

    /// The most recent task submitted for `coord`, if it has not been cancelled away.
    pub fn task(&self, coord: ChunkCoord) -> Option<Arc<BuildTask>> {
        self.shared.chunks.get(coord)?.lock_task().clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let pool = &self.shared.pool;
        PipelineStats {
            pending_tasks: self.shared.tasks.len(),
            parked_tasks: self.shared.parked.len(),
            pending_uploads: self.shared.uploads.len(),
            free_builders: pool.free_count(),
            borrowed_builders: pool.borrowed(),
            peak_borrowed_builders: pool.peak_borrowed(),
            builder_capacity: pool.capacity(),
            worker_threads: self.sizing.worker_threads,
        }
    }

    /// One-line status for a debug overlay.
    pub fn debug_info(&self) -> String {
        let pending = self.shared.tasks.len();
        if self.sizing.single_threaded() {
            format!("pC: {:03}, single-threaded", pending)
        } else {
            format!(
                "pC: {:03}, pU: {:1}, aB: {:1}",
                pending,
                self.shared.uploads.len(),
                self.shared.pool.free_count()
            )
        }
    }

    pub fn is_idle(&self) -> bool {
        self.shared.tasks.is_empty() && self.shared.uploads.is_empty()
    }

    pub fn builders_exhausted(&self) -> bool {
        self.shared.pool.free_count() == 0
    }

    pub fn crash_report(&self) -> Option<CrashReport> {
        self.shared.crash.report()
    }

    /// Cancel everything, join the workers and release every builder.
    /// Safe to call more than once; later calls do nothing.
    pub fn stop(&self) -> StopReport {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return StopReport::default();
        }
        let shared = &self.shared;
        let mut report = StopReport::default();

        for t in shared.tasks.close() {
            report.cancelled_tasks += usize::from(t.finish());
        }
        shared.pool.close();
        for t in shared.parked.drain() {
            report.cancelled_tasks += usize::from(t.finish());
        }
        for slot in shared.chunks.all() {
            let live = slot.lock_task().take();
            if let Some(t) = live {
                report.cancelled_tasks += usize::from(t.finish());
            }
        }

        while self.exit_rx.recv().is_ok() {}
        drop(self.lock_threads().take());

        let dropped = shared.uploads.close();
        report.dropped_uploads = dropped.len();
        drop(dropped);
        report.reclaimed_builders = shared.pool.drain();

        let borrowed = shared.pool.borrowed();
        if borrowed > 0 {
            log::warn!(target: "pipeline", "{} builder(s) still borrowed after stop", borrowed);
        }
        log::info!(
            target: "pipeline",
            "chunk pipeline stopped: {} task(s) cancelled, {} upload(s) dropped, {} builder(s) reclaimed",
            report.cancelled_tasks,
            report.dropped_uploads,
            report.reclaimed_builders
        );
        report
    }

    fn lock_threads(&self) -> MutexGuard<'_, Option<ThreadPool>> {
        self.threads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_thread(&self) -> Result<(), PipelineError> {
        let actual = thread::current().id();
        if actual != self.graphics_thread {
            return Err(PipelineError::WrongThread {
                expected: self.graphics_thread,
                actual,
            });
        }
        Ok(())
    }

    fn check_crash(&self) -> Result<(), PipelineError> {
        match self.shared.crash.report() {
            Some(report) => Err(PipelineError::Crashed(report)),
            None => Ok(()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
