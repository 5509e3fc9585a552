use crate::layer::{Quad, RenderLayer};

/// Finished geometry summary for one chunk: which layers have data, and the
/// translucent quads kept around so the layer can be re-sorted later without
/// touching block data.
#[derive(Clone, Debug, Default)]
pub struct CompiledChunk {
    started: [bool; RenderLayer::COUNT],
    vertex_counts: [usize; RenderLayer::COUNT],
    translucent: Vec<Quad>,
    sorted_from: Option<[f32; 3]>,
}

impl CompiledChunk {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn mark_layer(&mut self, layer: RenderLayer, vertices: usize) {
        let i = layer.index();
        self.started[i] = vertices > 0;
        self.vertex_counts[i] = vertices;
    }

    #[inline]
    pub fn is_layer_started(&self, layer: RenderLayer) -> bool {
        self.started[layer.index()]
    }

    #[inline]
    pub fn layer_vertex_count(&self, layer: RenderLayer) -> usize {
        self.vertex_counts[layer.index()]
    }

    pub fn total_vertices(&self) -> usize {
        self.vertex_counts.iter().sum()
    }

    pub fn started_layers(&self) -> impl Iterator<Item = RenderLayer> + '_ {
        RenderLayer::ALL
            .into_iter()
            .filter(|l| self.is_layer_started(*l))
    }

    pub fn has_translucent(&self) -> bool {
        !self.translucent.is_empty()
    }

    pub fn translucent_quads(&self) -> &[Quad] {
        &self.translucent
    }

    /// Eye position the translucent layer was last sorted for.
    pub fn sorted_from(&self) -> Option<[f32; 3]> {
        self.sorted_from
    }

    pub fn set_translucent(&mut self, quads: Vec<Quad>, vertices: usize, eye: [f32; 3]) {
        self.mark_layer(RenderLayer::Translucent, vertices);
        self.translucent = quads;
        self.sorted_from = Some(eye);
    }

    /// Copy of `self` with the translucent layer replaced.
    pub fn with_translucent(&self, quads: Vec<Quad>, vertices: usize, eye: [f32; 3]) -> Self {
        let mut out = self.clone();
        out.set_translucent(quads, vertices, eye);
        out
    }
}
