//! Heightmap world used by the headless driver and integration tests.
//!
//! Terrain is a single OpenSimplex2 height field with a water plane and the
//! occasional leaf canopy. Columns start unloaded; callers load them
//! explicitly so neighbor-availability checks have something to observe.

use std::sync::RwLock;

use fastnoise_lite::{FastNoiseLite, NoiseType};
use hashbrown::HashSet;

use crate::{Block, BlockRegionView, CHUNK_SIZE, ChunkSource};

pub struct NoiseWorld {
    pub seed: i32,
    pub chunk_size: usize,
    pub min_height: i32,
    pub max_height: i32,
    pub sea_level: i32,
    terrain: FastNoiseLite,
    loaded: RwLock<HashSet<(i32, i32)>>,
}

impl NoiseWorld {
    pub fn new(seed: i32) -> Self {
        let mut terrain = FastNoiseLite::with_seed(seed);
        terrain.set_noise_type(Some(NoiseType::OpenSimplex2));
        terrain.set_frequency(Some(0.011));
        Self {
            seed,
            chunk_size: CHUNK_SIZE,
            min_height: 4,
            max_height: 40,
            sea_level: 14,
            terrain,
            loaded: RwLock::new(HashSet::new()),
        }
    }

    /// Surface height (topmost solid block) of the column at `(wx, wz)`.
    pub fn height_at(&self, wx: i32, wz: i32) -> i32 {
        let h = self.terrain.get_noise_2d(wx as f32, wz as f32);
        let span = (self.max_height - self.min_height) as f32;
        let hh = ((h + 1.0) * 0.5 * span) as i32 + self.min_height;
        hh.clamp(1, self.max_height)
    }

    pub fn block_at(&self, wx: i32, wy: i32, wz: i32) -> Block {
        if wy < 0 {
            return Block::STONE;
        }
        let height = self.height_at(wx, wz);
        if wy <= height - 4 {
            return Block::STONE;
        }
        if wy < height {
            return Block::DIRT;
        }
        if wy == height {
            return if height <= self.sea_level + 1 {
                Block::SAND
            } else {
                Block::GRASS
            };
        }
        if wy <= self.sea_level {
            return Block::WATER;
        }
        let canopy = height > self.sea_level + 1 && (height + 2..=height + 4).contains(&wy);
        if canopy && canopy_hash(self.seed, wx, wz) % 61 == 0 {
            return Block::LEAVES;
        }
        Block::AIR
    }

    /// Mark the column loaded. Returns `true` if it was not loaded before.
    pub fn load_column(&self, cx: i32, cz: i32) -> bool {
        self.loaded.write().unwrap_or_else(|e| e.into_inner()).insert((cx, cz))
    }

    pub fn unload_column(&self, cx: i32, cz: i32) -> bool {
        self.loaded.write().unwrap_or_else(|e| e.into_inner()).remove(&(cx, cz))
    }

    pub fn loaded_columns(&self) -> usize {
        self.loaded.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl ChunkSource for NoiseWorld {
    fn is_chunk_loaded(&self, cx: i32, cz: i32) -> bool {
        self.loaded
            .read()
            .map(|s| s.contains(&(cx, cz)))
            .unwrap_or(false)
    }

    fn load_block_region(&self, min: [i32; 3], max: [i32; 3]) -> BlockRegionView {
        BlockRegionView::from_fn(min, max, |x, y, z| self.block_at(x, y, z))
    }
}

fn canopy_hash(seed: i32, wx: i32, wz: i32) -> u32 {
    let mut h = seed as u32 ^ 0x9E37_79B9;
    h = h.wrapping_mul(31).wrapping_add(wx as u32);
    h = h.wrapping_mul(0x85EB_CA6B).rotate_left(13);
    h = h.wrapping_mul(31).wrapping_add(wz as u32);
    h ^= h >> 16;
    h.wrapping_mul(0xC2B2_AE35)
}
