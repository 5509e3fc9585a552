use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use strata_mesh::{BuildKind, CompiledChunk, RegionBuilders, RenderLayer};

use crate::GpuUploader;
use crate::chunks::ChunkSlot;
use crate::dispatcher::Shared;
use crate::error::{BuildError, CrashReport, Interrupted, panic_message};
use crate::task::{BuildTask, TaskStatus};
use crate::upload::UploadBatch;

pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Runs the compile half of a task: edge guard, region snapshot, meshing.
pub(crate) struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Background loop: take, build, hand layers to the upload queue.
    pub(crate) fn run(&self) {
        log::debug!(target: "pipeline", "chunk worker started");
        loop {
            let task = match self.shared.tasks.take() {
                Ok(t) => t,
                Err(Interrupted) => break,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| self.process_pooled(&task)))
                .unwrap_or_else(|p| Err(BuildError::Panicked(panic_message(p.as_ref()))));
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(err) => {
                    task.finish();
                    self.shared
                        .fail(CrashReport::here("Batching chunks", Some(task.coord()), err));
                    return;
                }
            }
        }
        log::debug!(target: "pipeline", "Stopping chunk worker due to interrupt");
    }

    fn process_pooled(&self, task: &Arc<BuildTask>) -> Result<Flow, BuildError> {
        if !self.begin(task) {
            return Ok(Flow::Continue);
        }
        let mut builders = match self.shared.pool.acquire() {
            Ok(b) => b,
            Err(Interrupted) => {
                task.finish();
                return Ok(Flow::Stop);
            }
        };
        let compiled = self.build(task, &mut builders)?;
        if !self.enter_upload(task) {
            return Ok(Flow::Continue);
        }

        let layers = layers_to_upload(task.kind(), &compiled);
        let slot = self.shared.chunks.get(task.coord());
        if layers.is_empty() {
            drop(builders);
            publish_without_upload(task, slot, compiled);
            return Ok(Flow::Continue);
        }

        let batch = UploadBatch::new(Arc::clone(task), slot, compiled, builders, layers.len());
        // Cancelling mid-upload hands the builder back without waiting for the graphics thread.
        let weak = Arc::downgrade(&batch);
        task.add_finish_callback(Box::new(move |_| {
            if let Some(b) = weak.upgrade() {
                b.release_early();
            }
        }));
        for layer in layers {
            let upload = self.shared.uploads.make(&batch, layer);
            if let Err(rejected) = self.shared.uploads.push(upload) {
                drop(rejected);
            }
        }
        Ok(Flow::Continue)
    }

    /// Build and upload on the calling thread, which must be the graphics thread.
    pub(crate) fn process_inline(
        &self,
        task: &Arc<BuildTask>,
        builders: &mut RegionBuilders,
        gpu: &mut dyn GpuUploader,
    ) -> Result<(), BuildError> {
        if !self.begin(task) {
            return Ok(());
        }
        builders.reset();
        let compiled = self.build(task, builders)?;
        if !self.enter_upload(task) {
            return Ok(());
        }
        for layer in layers_to_upload(task.kind(), &compiled) {
            gpu.upload(task.coord(), layer, builders.layer(layer))?;
        }
        builders.reset();
        publish_without_upload(task, self.shared.chunks.get(task.coord()), compiled);
        Ok(())
    }

    /// PENDING to COMPILING, subject to the edge guard.
    fn begin(&self, task: &Arc<BuildTask>) -> bool {
        match task.begin_compile(|| self.neighbors_ready(task)) {
            Ok(started) => started,
            Err(TaskStatus::Finished) => {
                log::debug!(target: "pipeline", "skipping cancelled task for {}", task.coord());
                false
            }
            Err(found) => {
                log::warn!(
                    target: "pipeline",
                    "chunk render task for {} was {:?} when I expected it to be pending; ignoring task",
                    task.coord(),
                    found
                );
                false
            }
        }
    }

    fn enter_upload(&self, task: &BuildTask) -> bool {
        match task.advance(TaskStatus::Compiling, TaskStatus::Uploading) {
            Ok(()) => true,
            Err(TaskStatus::Finished) => false,
            Err(found) => {
                log::warn!(
                    target: "pipeline",
                    "chunk render task for {} was {:?} when I expected it to be compiling; aborting task",
                    task.coord(),
                    found
                );
                false
            }
        }
    }

    /// Runs under the task lock. Far chunks wait for their four neighbor columns.
    fn neighbors_ready(&self, task: &Arc<BuildTask>) -> bool {
        let shared = &self.shared;
        let observer = shared.observer();
        let coord = task.coord();
        if coord.center_distance_sq(shared.chunk_size, observer) <= shared.edge_guard_sq {
            return true;
        }
        for column in coord.horizontal_neighbor_columns() {
            let loaded = || shared.world.is_chunk_loaded(column.0, column.1);
            if loaded() {
                continue;
            }
            if !shared.requeue_on_neighbor_load {
                log::debug!(target: "pipeline", "dropping {}: column {:?} not loaded", coord, column);
                return false;
            }
            // Re-checked under the parked lock; the column may have loaded since.
            if shared.parked.park_unless(column, task, loaded) {
                log::debug!(target: "pipeline", "parking {} until column {:?} loads", coord, column);
                return false;
            }
        }
        true
    }

    fn build(&self, task: &BuildTask, out: &mut RegionBuilders) -> Result<CompiledChunk, BuildError> {
        let shared = &self.shared;
        let coord = task.coord();
        let cs = shared.chunk_size;
        let eye = shared.observer().map(|v| v as f32);
        match task.kind() {
            BuildKind::FullRebuild => {
                let [ox, oy, oz] = coord.origin(cs);
                let s = cs as i32;
                // One block of padding so faces on the chunk border see their neighbors.
                let region = shared
                    .world
                    .load_block_region([ox - 1, oy - 1, oz - 1], [ox + s, oy + s, oz + s]);
                Ok(shared.mesher.build_chunk(&region, coord, cs, eye, out)?)
            }
            BuildKind::TransparencyResort => match task.previous() {
                Some(prev) => Ok(shared.mesher.resort_translucent(prev, coord, cs, eye, out)?),
                None => Ok(CompiledChunk::empty()),
            },
        }
    }
}

fn layers_to_upload(kind: BuildKind, compiled: &CompiledChunk) -> Vec<RenderLayer> {
    match kind {
        BuildKind::FullRebuild => compiled.started_layers().collect(),
        BuildKind::TransparencyResort => {
            if compiled.is_layer_started(RenderLayer::Translucent) {
                vec![RenderLayer::Translucent]
            } else {
                Vec::new()
            }
        }
    }
}

fn publish_without_upload(
    task: &BuildTask,
    slot: Option<Arc<ChunkSlot>>,
    compiled: CompiledChunk,
) {
    let compiled = Arc::new(compiled);
    let res = task.complete(|| {
        if let Some(slot) = &slot {
            slot.publish(compiled);
        }
    });
    match res {
        Ok(()) | Err(TaskStatus::Finished) => {}
        Err(found) => {
            log::warn!(target: "pipeline", "chunk {} was {:?} at publish, expected uploading", task.coord(), found);
        }
    }
}
