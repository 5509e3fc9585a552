use strata_world::{Block, BlockRegionView, ChunkCoord};

use crate::builders::RegionBuilders;
use crate::compiled::CompiledChunk;
use crate::layer::{Quad, RenderLayer, sort_back_to_front};
use crate::{MeshError, Mesher};

const FACES: [([f32; 3], [[f32; 3]; 4]); 6] = [
    (
        [1.0, 0.0, 0.0],
        [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]],
    ),
    (
        [-1.0, 0.0, 0.0],
        [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
    ),
    (
        [0.0, 1.0, 0.0],
        [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]],
    ),
    (
        [0.0, -1.0, 0.0],
        [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
    ),
    (
        [0.0, 0.0, 1.0],
        [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
    ),
    (
        [0.0, 0.0, -1.0],
        [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
    ),
];

/// Face-culling mesher: one quad per exposed block face, no merging.
#[derive(Clone, Copy, Debug, Default)]
pub struct CubeMesher;

impl CubeMesher {
    pub fn layer_for(block: Block) -> Option<RenderLayer> {
        match block {
            Block::AIR => None,
            Block::LEAVES => Some(RenderLayer::CutoutMipped),
            Block::GLASS => Some(RenderLayer::Cutout),
            Block::WATER => Some(RenderLayer::Translucent),
            _ => Some(RenderLayer::Solid),
        }
    }

    fn color(block: Block) -> [u8; 4] {
        match block {
            Block::STONE => [128, 128, 132, 255],
            Block::DIRT => [121, 85, 58, 255],
            Block::GRASS => [86, 150, 62, 255],
            Block::SAND => [219, 206, 160, 255],
            Block::WATER => [48, 92, 200, 160],
            Block::LEAVES => [58, 118, 44, 255],
            Block::GLASS => [210, 230, 240, 90],
            _ => [255, 0, 255, 255],
        }
    }

    fn hides(block: Block, neighbor: Block) -> bool {
        neighbor == block || Self::layer_for(neighbor) == Some(RenderLayer::Solid)
    }
}

impl Mesher for CubeMesher {
    fn build_chunk(
        &self,
        region: &BlockRegionView,
        coord: ChunkCoord,
        chunk_size: usize,
        eye: [f32; 3],
        out: &mut RegionBuilders,
    ) -> Result<CompiledChunk, MeshError> {
        let [ox, oy, oz] = coord.origin(chunk_size);
        let s = chunk_size as i32;
        let far = [ox + s - 1, oy + s - 1, oz + s - 1];
        if !region.contains(ox, oy, oz) || !region.contains(far[0], far[1], far[2]) {
            return Err(MeshError::InvalidRegion(format!(
                "region at {:?} size {:?} does not cover chunk {}",
                region.min(),
                region.size(),
                coord
            )));
        }

        let mut translucent: Vec<Quad> = Vec::new();
        for y in 0..s {
            for z in 0..s {
                for x in 0..s {
                    let (wx, wy, wz) = (ox + x, oy + y, oz + z);
                    let block = region.get(wx, wy, wz);
                    let Some(layer) = Self::layer_for(block) else {
                        continue;
                    };
                    let rgba = Self::color(block);
                    for (normal, corners) in FACES.iter() {
                        let n = region.get(
                            wx + normal[0] as i32,
                            wy + normal[1] as i32,
                            wz + normal[2] as i32,
                        );
                        if Self::hides(block, n) {
                            continue;
                        }
                        let corners = corners.map(|c| {
                            [c[0] + x as f32, c[1] + y as f32, c[2] + z as f32]
                        });
                        if layer == RenderLayer::Translucent {
                            translucent.push(Quad {
                                corners,
                                normal: *normal,
                                rgba,
                            });
                        } else {
                            out.layer_mut(layer).add_quad(corners, *normal, rgba);
                        }
                    }
                }
            }
        }

        let mut compiled = CompiledChunk::empty();
        for layer in RenderLayer::ALL {
            if layer != RenderLayer::Translucent {
                compiled.mark_layer(layer, out.layer(layer).vertex_count());
            }
        }
        // Quads live in chunk-local space, so the eye has to follow.
        let local_eye = [
            eye[0] - ox as f32,
            eye[1] - oy as f32,
            eye[2] - oz as f32,
        ];
        sort_back_to_front(&mut translucent, local_eye);
        let tl = out.layer_mut(RenderLayer::Translucent);
        for q in &translucent {
            tl.push_quad(q);
        }
        let vertices = tl.vertex_count();
        log::trace!(
            "meshed {}: {} opaque vertices, {} translucent quads",
            coord,
            out.layer(RenderLayer::Solid).vertex_count(),
            translucent.len()
        );
        compiled.set_translucent(translucent, vertices, local_eye);
        Ok(compiled)
    }
}
