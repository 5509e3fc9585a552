use crate::layer::{LayerBuffer, RenderLayer};

/// Scratch build buffer: one reusable [`LayerBuffer`] per render layer.
///
/// A chunk's geometry is assembled here on a worker, then read from here
/// by the upload step. Allocations survive [`RegionBuilders::reset`], which is
/// the point of pooling them.
#[derive(Default, Debug)]
pub struct RegionBuilders {
    layers: [LayerBuffer; RenderLayer::COUNT],
}

impl RegionBuilders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate room for `quads` quads in every layer.
    pub fn with_capacity(quads: usize) -> Self {
        Self {
            layers: std::array::from_fn(|_| LayerBuffer::with_capacity(quads)),
        }
    }

    #[inline]
    pub fn layer(&self, layer: RenderLayer) -> &LayerBuffer {
        &self.layers[layer.index()]
    }

    #[inline]
    pub fn layer_mut(&mut self, layer: RenderLayer) -> &mut LayerBuffer {
        &mut self.layers[layer.index()]
    }

    pub fn reset(&mut self) {
        for l in &mut self.layers {
            l.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(LayerBuffer::is_empty)
    }
}
