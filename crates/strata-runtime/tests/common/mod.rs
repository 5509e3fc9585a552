#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use strata_mesh::{CompiledChunk, CubeMesher, LayerBuffer, MeshError, Mesher, RegionBuilders, RenderLayer};
use strata_runtime::{
    Dispatcher, GpuUploader, PipelineConfig, PipelineContext, UploadError,
};
use strata_world::{Block, BlockRegionView, ChunkCoord, ChunkSource};

/// Stone floor at y = 0, optionally with a water layer on top.
pub struct TestWorld {
    water: bool,
    missing: Mutex<HashSet<(i32, i32)>>,
}

impl TestWorld {
    pub fn floor() -> Arc<Self> {
        Arc::new(Self {
            water: false,
            missing: Mutex::new(HashSet::new()),
        })
    }

    pub fn pond() -> Arc<Self> {
        Arc::new(Self {
            water: true,
            missing: Mutex::new(HashSet::new()),
        })
    }

    pub fn unload(&self, cx: i32, cz: i32) {
        self.missing.lock().unwrap().insert((cx, cz));
    }

    pub fn load(&self, cx: i32, cz: i32) {
        self.missing.lock().unwrap().remove(&(cx, cz));
    }

    fn block(&self, _x: i32, y: i32, _z: i32) -> Block {
        match y {
            0 => Block::STONE,
            1 if self.water => Block::WATER,
            _ => Block::AIR,
        }
    }
}

impl ChunkSource for TestWorld {
    fn is_chunk_loaded(&self, cx: i32, cz: i32) -> bool {
        !self.missing.lock().unwrap().contains(&(cx, cz))
    }

    fn load_block_region(&self, min: [i32; 3], max: [i32; 3]) -> BlockRegionView {
        BlockRegionView::from_fn(min, max, |x, y, z| self.block(x, y, z))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Error,
    Panic,
}

/// Wraps [`CubeMesher`], reporting each build and optionally blocking or failing.
pub struct ProbeMesher {
    inner: CubeMesher,
    started: Sender<ChunkCoord>,
    gate: Option<Receiver<()>>,
    failure: Option<Failure>,
}

pub struct Probe {
    pub mesher: Arc<ProbeMesher>,
    pub started: Receiver<ChunkCoord>,
    pub gate: Option<Sender<()>>,
}

impl ProbeMesher {
    pub fn plain() -> Probe {
        Self::make(false, None)
    }

    pub fn gated() -> Probe {
        Self::make(true, None)
    }

    pub fn failing(failure: Failure) -> Probe {
        Self::make(false, Some(failure))
    }

    fn make(gated: bool, failure: Option<Failure>) -> Probe {
        let (started_tx, started_rx) = unbounded();
        let (gate_tx, gate_rx) = if gated {
            let (tx, rx) = unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Probe {
            mesher: Arc::new(ProbeMesher {
                inner: CubeMesher,
                started: started_tx,
                gate: gate_rx,
                failure,
            }),
            started: started_rx,
            gate: gate_tx,
        }
    }
}

impl Mesher for ProbeMesher {
    fn build_chunk(
        &self,
        region: &BlockRegionView,
        coord: ChunkCoord,
        chunk_size: usize,
        eye: [f32; 3],
        out: &mut RegionBuilders,
    ) -> Result<CompiledChunk, MeshError> {
        let _ = self.started.send(coord);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        match self.failure {
            Some(Failure::Error) => return Err(MeshError::Failed("probe refused".into())),
            Some(Failure::Panic) => panic!("mesher exploded"),
            None => {}
        }
        self.inner.build_chunk(region, coord, chunk_size, eye, out)
    }
}

/// Records every layer upload it is handed.
#[derive(Default)]
pub struct RecordingGpu {
    pub uploads: Vec<(ChunkCoord, RenderLayer, usize)>,
}

impl RecordingGpu {
    pub fn chunks(&self) -> Vec<ChunkCoord> {
        let mut out: Vec<ChunkCoord> = Vec::new();
        for (c, _, _) in &self.uploads {
            if out.last() != Some(c) {
                out.push(*c);
            }
        }
        out
    }

    pub fn layers_for(&self, coord: ChunkCoord) -> Vec<RenderLayer> {
        self.uploads
            .iter()
            .filter(|(c, _, _)| *c == coord)
            .map(|(_, l, _)| *l)
            .collect()
    }
}

impl GpuUploader for RecordingGpu {
    fn upload(
        &mut self,
        coord: ChunkCoord,
        layer: RenderLayer,
        geometry: &LayerBuffer,
    ) -> Result<(), UploadError> {
        self.uploads.push((coord, layer, geometry.vertex_count()));
        Ok(())
    }
}

pub fn config(threads: usize, builders: usize) -> PipelineConfig {
    PipelineConfig {
        worker_threads: Some(threads),
        builder_capacity: Some(builders),
        ..PipelineConfig::default()
    }
}

pub fn dispatcher(
    world: Arc<TestWorld>,
    mesher: Arc<dyn Mesher>,
    threads: usize,
    builders: usize,
) -> Dispatcher {
    Dispatcher::new(PipelineContext { world, mesher }, &config(threads, builders)).unwrap()
}

/// Poll `f` until it holds or five seconds pass.
pub fn wait_until(mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}

/// Drain on the calling (graphics) thread until `f` holds.
pub fn drain_until(d: &Dispatcher, gpu: &mut RecordingGpu, mut f: impl FnMut(&Dispatcher) -> bool) -> bool {
    wait_until(|| {
        d.drain_uploads(&mut *gpu, None).unwrap();
        f(d)
    })
}
