use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use hashbrown::HashMap;
use strata_mesh::CompiledChunk;
use strata_world::ChunkCoord;

use crate::task::BuildTask;

/// Per-chunk bookkeeping: the live task and the last published geometry.
///
/// `current` doubles as the chunk's compile lock. Lock order is slot, then
/// task, then queue; nothing that holds a task lock may take a slot lock.
pub(crate) struct ChunkSlot {
    current: Mutex<Option<Arc<BuildTask>>>,
    compiled: RwLock<Option<Arc<CompiledChunk>>>,
}

impl ChunkSlot {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
            compiled: RwLock::new(None),
        }
    }

    pub(crate) fn lock_task(&self) -> MutexGuard<'_, Option<Arc<BuildTask>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn compiled(&self) -> Option<Arc<CompiledChunk>> {
        self.compiled.read().ok().and_then(|c| c.clone())
    }

    pub(crate) fn publish(&self, compiled: Arc<CompiledChunk>) {
        let mut slot = self.compiled.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(compiled);
    }
}

#[derive(Default)]
pub(crate) struct ChunkTable {
    slots: RwLock<HashMap<ChunkCoord, Arc<ChunkSlot>>>,
}

impl ChunkTable {
    pub(crate) fn get(&self, coord: ChunkCoord) -> Option<Arc<ChunkSlot>> {
        self.slots.read().ok()?.get(&coord).cloned()
    }

    pub(crate) fn get_or_insert(&self, coord: ChunkCoord) -> Arc<ChunkSlot> {
        if let Some(slot) = self.get(coord) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(coord)
            .or_insert_with(|| Arc::new(ChunkSlot::new()))
            .clone()
    }

    pub(crate) fn remove(&self, coord: ChunkCoord) -> Option<Arc<ChunkSlot>> {
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&coord)
    }

    pub(crate) fn all(&self) -> Vec<Arc<ChunkSlot>> {
        match self.slots.read() {
            Ok(s) => s.values().cloned().collect(),
            Err(e) => e.into_inner().values().cloned().collect(),
        }
    }
}
