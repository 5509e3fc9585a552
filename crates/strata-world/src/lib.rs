//! Chunk coordinates, block snapshots, and the world-access seam used by the mesh pipeline.
#![forbid(unsafe_code)]

mod chunk_coord;
pub mod noise_world;
mod region;

pub use chunk_coord::ChunkCoord;
pub use noise_world::NoiseWorld;
pub use region::{Block, BlockRegionView};

/// Edge length of a chunk in blocks along every axis.
pub const CHUNK_SIZE: usize = 16;

/// Read access to world data, as seen by chunk mesh builders.
///
/// Implementations are shared between the render thread and every build
/// worker, so all methods take `&self` and must be cheap to call concurrently.
pub trait ChunkSource: Send + Sync {
    /// Whether the chunk column at `(cx, cz)` has block data available.
    fn is_chunk_loaded(&self, cx: i32, cz: i32) -> bool;

    /// Snapshot every block in the inclusive box `min..=max` (world block coordinates).
    fn load_block_region(&self, min: [i32; 3], max: [i32; 3]) -> BlockRegionView;
}
