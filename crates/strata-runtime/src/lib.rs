//! Chunk mesh build & upload pipeline.
//!
//! Background workers turn chunk build requests into per-layer geometry using
//! a bounded pool of scratch builders; the graphics thread drains finished
//! layers to the GPU under a time budget. The [`Dispatcher`] owns all of it.
#![forbid(unsafe_code)]

mod builder_pool;
mod chunks;
mod config;
mod dispatcher;
mod error;
mod parked;
mod sizing;
mod task;
mod task_queue;
mod upload;
mod worker;

pub use builder_pool::{BuilderPool, PooledBuilders};
pub use config::PipelineConfig;
pub use dispatcher::{Dispatcher, PipelineContext, PipelineStats, StopReport, SubmitOutcome};
pub use error::{BuildError, CrashReport, Interrupted, PipelineError, UploadError};
pub use sizing::{BUILDER_BYTES_ESTIMATE, PoolSizing};
pub use task::{BuildTask, FinishCallback, TaskStatus};
pub use task_queue::TaskQueue;

use strata_mesh::{LayerBuffer, RenderLayer};
use strata_world::ChunkCoord;

/// Access to GPU buffers. Only the graphics thread ever holds one.
pub trait GpuUploader {
    fn upload(
        &mut self,
        coord: ChunkCoord,
        layer: RenderLayer,
        geometry: &LayerBuffer,
    ) -> Result<(), UploadError>;
}
