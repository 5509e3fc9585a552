//! Headless streaming run: columns load around a moving observer, chunks are
//! queued as they become available, and every frame drains uploads under a
//! fixed time budget into a GPU stand-in that only keeps counts.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use strata_mesh::{BuildKind, CubeMesher, LayerBuffer, RenderLayer};
use strata_runtime::{Dispatcher, GpuUploader, PipelineError, StopReport, UploadError};
use strata_world::{ChunkCoord, NoiseWorld};

use crate::config::DemoConfig;

/// Keeps the vertex count of the latest upload per chunk layer.
#[derive(Default)]
pub struct CountingUploader {
    resident: HashMap<(ChunkCoord, RenderLayer), usize>,
    pub uploads: u64,
    pub bytes: u64,
}

impl CountingUploader {
    pub fn resident_vertices(&self) -> usize {
        self.resident.values().sum()
    }

    pub fn resident_chunks(&self) -> usize {
        self.resident
            .keys()
            .map(|(c, _)| *c)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn forget(&mut self, coord: ChunkCoord) {
        self.resident.retain(|(c, _), _| *c != coord);
    }
}

impl GpuUploader for CountingUploader {
    fn upload(
        &mut self,
        coord: ChunkCoord,
        layer: RenderLayer,
        geometry: &LayerBuffer,
    ) -> Result<(), UploadError> {
        self.uploads += 1;
        self.bytes += geometry.byte_len() as u64;
        self.resident.insert((coord, layer), geometry.vertex_count());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DemoSummary {
    pub frames: u32,
    pub uploads: u64,
    pub bytes: u64,
    pub resident_chunks: usize,
    pub resident_vertices: usize,
    pub stop: StopReport,
}

pub struct Demo {
    cfg: DemoConfig,
    world: Arc<NoiseWorld>,
    dispatcher: Dispatcher,
    gpu: CountingUploader,
    observer: [f64; 3],
    chunk_size: usize,
    columns: HashSet<(i32, i32)>,
}

impl Demo {
    pub fn new(
        cfg: DemoConfig,
        world: Arc<NoiseWorld>,
        dispatcher: Dispatcher,
        chunk_size: usize,
    ) -> Self {
        let observer = [0.5, 30.0, 0.5];
        dispatcher.set_observer(observer);
        Self {
            cfg,
            world,
            dispatcher,
            gpu: CountingUploader::default(),
            observer,
            chunk_size,
            columns: HashSet::new(),
        }
    }

    pub fn mesher() -> Arc<CubeMesher> {
        Arc::new(CubeMesher)
    }

    fn observer_column(&self) -> (i32, i32) {
        let cs = self.chunk_size as f64;
        (
            (self.observer[0] / cs).floor() as i32,
            (self.observer[2] / cs).floor() as i32,
        )
    }

    fn priority(&self, coord: ChunkCoord) -> f64 {
        coord.center_distance_sq(self.chunk_size, self.observer)
    }

    /// Make the nearest missing columns available and queue their chunks.
    fn stream_in(&mut self) {
        let (ox, oz) = self.observer_column();
        let r = self.cfg.radius;
        let mut wanted: Vec<(i32, i32)> = Vec::new();
        for dz in -r..=r {
            for dx in -r..=r {
                if dx * dx + dz * dz <= r * r {
                    wanted.push((ox + dx, oz + dz));
                }
            }
        }
        wanted.sort_by_key(|&(x, z)| (x - ox).pow(2) + (z - oz).pow(2));

        let mut loaded = 0;
        for (cx, cz) in wanted {
            if loaded >= self.cfg.columns_per_frame {
                break;
            }
            if !self.world.load_column(cx, cz) {
                continue;
            }
            loaded += 1;
            self.columns.insert((cx, cz));
            for cy in 0..self.cfg.vertical_chunks {
                let coord = ChunkCoord::new(cx, cy, cz);
                self.dispatcher
                    .submit(coord, BuildKind::FullRebuild, self.priority(coord));
            }
            self.dispatcher.notify_chunk_loaded(cx, cz);
        }
    }

    /// Drop columns that fell out of range.
    fn stream_out(&mut self) {
        let (ox, oz) = self.observer_column();
        let keep = self.cfg.radius + 1;
        let gone: Vec<(i32, i32)> = self
            .columns
            .iter()
            .copied()
            .filter(|&(x, z)| (x - ox).pow(2) + (z - oz).pow(2) > keep * keep)
            .collect();
        for (cx, cz) in gone {
            self.columns.remove(&(cx, cz));
            self.world.unload_column(cx, cz);
            for cy in 0..self.cfg.vertical_chunks {
                let coord = ChunkCoord::new(cx, cy, cz);
                self.dispatcher.evict(coord);
                self.gpu.forget(coord);
            }
        }
    }

    fn resort_nearby(&self) {
        let (ox, oz) = self.observer_column();
        for dz in -1..=1 {
            for dx in -1..=1 {
                for cy in 0..self.cfg.vertical_chunks {
                    let coord = ChunkCoord::new(ox + dx, cy, oz + dz);
                    self.dispatcher
                        .submit(coord, BuildKind::TransparencyResort, self.priority(coord));
                }
            }
        }
    }

    /// Keep draining until nothing is queued, uploading or holding a builder,
    /// or `timeout` passes. Parked chunks are left alone.
    fn settle(&mut self, timeout: Duration) -> Result<bool, PipelineError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatcher.drain_uploads(&mut self.gpu, None)?;
            let stats = self.dispatcher.stats();
            if stats.pending_tasks == 0 && stats.pending_uploads == 0 && stats.borrowed_builders == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn run(mut self) -> Result<DemoSummary, PipelineError> {
        let budget = Duration::from_millis(self.cfg.frame_budget_ms);
        let started = Instant::now();

        for frame in 0..self.cfg.frames {
            self.observer[0] += self.cfg.speed;
            self.dispatcher.set_observer(self.observer);

            self.stream_in();
            self.stream_out();

            if self.cfg.resort_every > 0 && frame % self.cfg.resort_every == 0 {
                self.resort_nearby();
            }

            self.dispatcher
                .drain_uploads(&mut self.gpu, Some(Instant::now() + budget))?;

            if self.cfg.report_every > 0 && frame % self.cfg.report_every == 0 {
                log::info!(
                    "frame {:>4} {} | columns {} | resident {} chunks, {} verts",
                    frame,
                    self.dispatcher.debug_info(),
                    self.world.loaded_columns(),
                    self.gpu.resident_chunks(),
                    self.gpu.resident_vertices()
                );
            }
        }

        if !self.settle(Duration::from_millis(self.cfg.settle_ms))? {
            log::warn!("work still in flight after {} ms; cutting it short", self.cfg.settle_ms);
        }
        self.dispatcher.quiesce(&mut self.gpu)?;
        let stop = self.dispatcher.stop();
        log::info!(
            "{} frames in {:.2?}: {} uploads, {} KiB, peak {} builder(s) in use",
            self.cfg.frames,
            started.elapsed(),
            self.gpu.uploads,
            self.gpu.bytes / 1024,
            self.dispatcher.stats().peak_borrowed_builders
        );
        Ok(DemoSummary {
            frames: self.cfg.frames,
            uploads: self.gpu.uploads,
            bytes: self.gpu.bytes,
            resident_chunks: self.gpu.resident_chunks(),
            resident_vertices: self.gpu.resident_vertices(),
            stop,
        })
    }
}
