#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: u16,
}

impl Block {
    pub const AIR: Block = Block { id: 0 };
    pub const STONE: Block = Block { id: 1 };
    pub const DIRT: Block = Block { id: 2 };
    pub const GRASS: Block = Block { id: 3 };
    pub const SAND: Block = Block { id: 4 };
    pub const WATER: Block = Block { id: 5 };
    pub const LEAVES: Block = Block { id: 6 };
    pub const GLASS: Block = Block { id: 7 };

    #[inline]
    pub const fn is_air(self) -> bool {
        self.id == 0
    }
}

/// Read-only copy of the blocks inside an axis-aligned box.
///
/// Reads outside the box return [`Block::AIR`] so mesh builders can sample
/// one block past a chunk boundary without special-casing edges.
#[derive(Clone, Debug)]
pub struct BlockRegionView {
    min: [i32; 3],
    size: [usize; 3],
    blocks: Vec<Block>,
}

impl BlockRegionView {
    /// Fill the inclusive box `min..=max` by sampling `f` at every world position.
    pub fn from_fn(min: [i32; 3], max: [i32; 3], mut f: impl FnMut(i32, i32, i32) -> Block) -> Self {
        let size = [
            (max[0] - min[0] + 1).max(0) as usize,
            (max[1] - min[1] + 1).max(0) as usize,
            (max[2] - min[2] + 1).max(0) as usize,
        ];
        let mut blocks = Vec::with_capacity(size[0] * size[1] * size[2]);
        for y in 0..size[1] {
            for z in 0..size[2] {
                for x in 0..size[0] {
                    blocks.push(f(
                        min[0] + x as i32,
                        min[1] + y as i32,
                        min[2] + z as i32,
                    ));
                }
            }
        }
        Self { min, size, blocks }
    }

    /// A region of only air; used by sources that have nothing loaded.
    pub fn empty(min: [i32; 3], max: [i32; 3]) -> Self {
        Self::from_fn(min, max, |_, _, _| Block::AIR)
    }

    #[inline]
    pub fn min(&self) -> [i32; 3] {
        self.min
    }

    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    #[inline]
    fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (y * self.size[2] + z) * self.size[0] + x
    }

    #[inline]
    pub fn contains(&self, wx: i32, wy: i32, wz: i32) -> bool {
        let l = [wx - self.min[0], wy - self.min[1], wz - self.min[2]];
        l.iter().zip(self.size.iter()).all(|(&v, &s)| v >= 0 && (v as usize) < s)
    }

    #[inline]
    pub fn get(&self, wx: i32, wy: i32, wz: i32) -> Block {
        if !self.contains(wx, wy, wz) {
            return Block::AIR;
        }
        let x = (wx - self.min[0]) as usize;
        let y = (wy - self.min[1]) as usize;
        let z = (wz - self.min[2]) as usize;
        self.blocks[self.idx(x, y, z)]
    }

    pub fn has_non_air(&self) -> bool {
        self.blocks.iter().any(|b| !b.is_air())
    }
}
