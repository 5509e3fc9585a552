use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    #[inline]
    pub fn distance_sq(self, other: ChunkCoord) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dy = i64::from(self.cy - other.cy);
        let dz = i64::from(self.cz - other.cz);
        dx * dx + dy * dy + dz * dz
    }

    /// Minimum-corner block position of this chunk.
    #[inline]
    pub fn origin(self, chunk_size: usize) -> [i32; 3] {
        let s = chunk_size as i32;
        [self.cx * s, self.cy * s, self.cz * s]
    }

    /// Block-space center of this chunk.
    #[inline]
    pub fn center(self, chunk_size: usize) -> [f64; 3] {
        let [x, y, z] = self.origin(chunk_size);
        let half = chunk_size as f64 * 0.5;
        [
            f64::from(x) + half,
            f64::from(y) + half,
            f64::from(z) + half,
        ]
    }

    /// Squared block-space distance from this chunk's center to `pos`.
    #[inline]
    pub fn center_distance_sq(self, chunk_size: usize, pos: [f64; 3]) -> f64 {
        let c = self.center(chunk_size);
        let dx = c[0] - pos[0];
        let dy = c[1] - pos[1];
        let dz = c[2] - pos[2];
        dx * dx + dy * dy + dz * dz
    }

    /// The four cardinal neighbor columns in -X, -Z, +X, +Z order.
    #[inline]
    pub fn horizontal_neighbor_columns(self) -> [(i32, i32); 4] {
        [
            (self.cx - 1, self.cz),
            (self.cx, self.cz - 1),
            (self.cx + 1, self.cz),
            (self.cx, self.cz + 1),
        ]
    }
}

impl From<(i32, i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<ChunkCoord> for (i32, i32, i32) {
    fn from(value: ChunkCoord) -> Self {
        (value.cx, value.cy, value.cz)
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.cx, self.cy, self.cz)
    }
}
