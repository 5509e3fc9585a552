use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use strata_runtime::PipelineConfig;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub demo: DemoConfig,
}

/// Knobs for the headless streaming run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub seed: i32,
    /// View radius in chunk columns.
    pub radius: i32,
    pub frames: u32,
    pub frame_budget_ms: u64,
    /// Chunks stacked per column, starting at y = 0.
    pub vertical_chunks: i32,
    /// Columns made available per frame, nearest first.
    pub columns_per_frame: usize,
    /// Observer speed along +X in blocks per frame.
    pub speed: f64,
    /// Resort translucent chunks near the observer every N frames; 0 disables.
    pub resort_every: u32,
    pub report_every: u32,
    /// Upper bound on draining in-flight work after the last frame.
    pub settle_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            radius: 5,
            frames: 240,
            frame_budget_ms: 4,
            vertical_chunks: 3,
            columns_per_frame: 6,
            speed: 0.75,
            resort_every: 30,
            report_every: 60,
            settle_ms: 500,
        }
    }
}

pub fn load_app_config(path: &Path) -> Result<AppConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&s)?;
    cfg.pipeline.validate()?;
    Ok(cfg)
}
