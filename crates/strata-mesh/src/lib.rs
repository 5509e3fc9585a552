//! Per-layer chunk geometry, scratch build buffers, and the meshing seam.
#![forbid(unsafe_code)]

mod builders;
mod compiled;
mod cube;
mod layer;

pub use builders::RegionBuilders;
pub use compiled::CompiledChunk;
pub use cube::CubeMesher;
pub use layer::{LayerBuffer, Quad, RenderLayer, sort_back_to_front};

use strata_world::{BlockRegionView, ChunkCoord};

/// What a build task produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildKind {
    /// Rebuild every layer from block data.
    FullRebuild,
    /// Re-sort the already-built translucent layer for a new eye position.
    TransparencyResort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshError {
    InvalidRegion(String),
    Failed(String),
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::InvalidRegion(msg) => write!(f, "invalid region: {}", msg),
            MeshError::Failed(msg) => write!(f, "meshing failed: {}", msg),
        }
    }
}

impl std::error::Error for MeshError {}

/// Converts block data into per-layer vertex data for one chunk.
///
/// Builders write into the caller's [`RegionBuilders`]; the buffers arrive
/// cleared and are uploaded layer by layer after the call returns.
pub trait Mesher: Send + Sync {
    fn build_chunk(
        &self,
        region: &BlockRegionView,
        coord: ChunkCoord,
        chunk_size: usize,
        eye: [f32; 3],
        out: &mut RegionBuilders,
    ) -> Result<CompiledChunk, MeshError>;

    /// Rewrite the translucent layer of `compiled` sorted for `eye` (world space).
    fn resort_translucent(
        &self,
        compiled: &CompiledChunk,
        coord: ChunkCoord,
        chunk_size: usize,
        eye: [f32; 3],
        out: &mut RegionBuilders,
    ) -> Result<CompiledChunk, MeshError> {
        let [ox, oy, oz] = coord.origin(chunk_size);
        let local_eye = [eye[0] - ox as f32, eye[1] - oy as f32, eye[2] - oz as f32];
        let mut quads = compiled.translucent_quads().to_vec();
        sort_back_to_front(&mut quads, local_eye);
        let layer = out.layer_mut(RenderLayer::Translucent);
        for q in &quads {
            layer.push_quad(q);
        }
        Ok(compiled.with_translucent(quads, layer.vertex_count(), local_eye))
    }
}
