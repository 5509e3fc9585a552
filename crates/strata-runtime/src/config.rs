use std::path::Path;

use serde::Deserialize;

use crate::error::PipelineError;

/// Pipeline tuning, normally read from the `[pipeline]` table of the app config.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Memory the builder pool may plan around; 30% of it goes to builders.
    pub memory_budget_bytes: u64,
    /// Force a worker thread count. `Some(1)` or `Some(0)` means single-threaded.
    pub worker_threads: Option<usize>,
    pub builder_capacity: Option<usize>,
    /// Chunks whose center is farther than this from the observer need all
    /// four neighbor columns loaded before they build.
    pub edge_guard_distance: f64,
    pub chunk_size: usize,
    /// Re-offer edge-guarded tasks when a missing neighbor column arrives.
    pub requeue_on_neighbor_load: bool,
    pub thread_name_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 2 << 30,
            worker_threads: None,
            builder_capacity: None,
            edge_guard_distance: 24.0,
            chunk_size: strata_world::CHUNK_SIZE,
            requeue_on_neighbor_load: true,
            thread_name_prefix: "chunk-batcher".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, PipelineError> {
        let cfg: Self = toml::from_str(src).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config("chunk_size must be positive".into()));
        }
        if !self.edge_guard_distance.is_finite() || self.edge_guard_distance < 0.0 {
            return Err(PipelineError::Config(format!(
                "edge_guard_distance must be a non-negative number, got {}",
                self.edge_guard_distance
            )));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(PipelineError::Config("thread_name_prefix is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(PipelineConfig::from_toml_str("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let cfg = PipelineConfig::from_toml_str(
            "worker_threads = 3\nedge_guard_distance = 40.0\nrequeue_on_neighbor_load = false\n",
        )
        .unwrap();
        assert_eq!(cfg.worker_threads, Some(3));
        assert_eq!(cfg.edge_guard_distance, 40.0);
        assert!(!cfg.requeue_on_neighbor_load);
        assert_eq!(cfg.chunk_size, 16);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(PipelineConfig::from_toml_str("chunk_size = 0").is_err());
        assert!(PipelineConfig::from_toml_str("edge_guard_distance = -1.0").is_err());
        assert!(PipelineConfig::from_toml_str("chunk_size = \"big\"").is_err());
    }
}
