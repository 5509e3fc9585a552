#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderLayer {
    Solid,
    CutoutMipped,
    Cutout,
    Translucent,
}

impl RenderLayer {
    pub const COUNT: usize = 4;
    pub const ALL: [RenderLayer; Self::COUNT] = [
        RenderLayer::Solid,
        RenderLayer::CutoutMipped,
        RenderLayer::Cutout,
        RenderLayer::Translucent,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [[f32; 3]; 4],
    pub normal: [f32; 3],
    pub rgba: [u8; 4],
}

impl Quad {
    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        let mut c = [0.0f32; 3];
        for v in &self.corners {
            c[0] += v[0];
            c[1] += v[1];
            c[2] += v[2];
        }
        [c[0] * 0.25, c[1] * 0.25, c[2] * 0.25]
    }
}

/// Sort quads farthest-first from `eye` so alpha blending composites correctly.
pub fn sort_back_to_front(quads: &mut [Quad], eye: [f32; 3]) {
    let dist = |q: &Quad| {
        let c = q.centroid();
        let dx = c[0] - eye[0];
        let dy = c[1] - eye[1];
        let dz = c[2] - eye[2];
        dx * dx + dy * dy + dz * dz
    };
    quads.sort_by(|a, b| dist(b).total_cmp(&dist(a)));
}

/// Vertex data for one render layer of one chunk.
#[derive(Default, Clone, Debug)]
pub struct LayerBuffer {
    pub pos: Vec<f32>,
    pub norm: Vec<f32>,
    pub col: Vec<u8>,
    pub idx: Vec<u32>,
}

impl LayerBuffer {
    pub fn with_capacity(quads: usize) -> Self {
        Self {
            pos: Vec::with_capacity(quads * 12),
            norm: Vec::with_capacity(quads * 12),
            col: Vec::with_capacity(quads * 16),
            idx: Vec::with_capacity(quads * 6),
        }
    }

    pub fn add_quad(&mut self, corners: [[f32; 3]; 4], n: [f32; 3], rgba: [u8; 4]) {
        let base = self.vertex_count() as u32;
        let mut vs = corners;
        let e1 = [
            vs[1][0] - vs[0][0],
            vs[1][1] - vs[0][1],
            vs[1][2] - vs[0][2],
        ];
        let e2 = [
            vs[2][0] - vs[0][0],
            vs[2][1] - vs[0][1],
            vs[2][2] - vs[0][2],
        ];
        let cross = [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ];
        if (cross[0] * n[0] + cross[1] * n[1] + cross[2] * n[2]) < 0.0 {
            vs.swap(1, 3);
        }
        for v in &vs {
            self.pos.extend_from_slice(v);
            self.norm.extend_from_slice(&n);
            self.col.extend_from_slice(&rgba);
        }
        self.idx
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    #[inline]
    pub fn push_quad(&mut self, q: &Quad) {
        self.add_quad(q.corners, q.normal, q.rgba);
    }

    /// Drop the contents but keep the allocations for the next build.
    pub fn clear(&mut self) {
        self.pos.clear();
        self.norm.clear();
        self.col.clear();
        self.idx.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.idx.len() / 6
    }

    pub fn byte_len(&self) -> usize {
        self.pos.len() * 4 + self.norm.len() * 4 + self.col.len() + self.idx.len() * 4
    }
}
