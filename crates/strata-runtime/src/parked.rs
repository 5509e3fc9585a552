use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::task::BuildTask;

type Column = (i32, i32);

#[derive(Default)]
struct ParkedInner {
    by_column: HashMap<Column, Vec<Arc<BuildTask>>>,
    column_of: HashMap<u64, Column>,
}

/// Tasks held back by the edge guard, keyed by the column they are waiting on.
///
/// Never takes a task lock while its own lock is held; parking itself runs
/// under the parked task's lock.
#[derive(Default)]
pub(crate) struct ParkedTasks {
    inner: Mutex<ParkedInner>,
}

impl ParkedTasks {
    fn lock(&self) -> MutexGuard<'_, ParkedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park `task` on `column` unless `loaded` reports the column present.
    ///
    /// The check runs under the parked lock, so a `take_column` issued after
    /// the column was marked loaded either finds the task or is seen here.
    /// Returns whether the task was parked.
    pub(crate) fn park_unless(
        &self,
        column: Column,
        task: &Arc<BuildTask>,
        loaded: impl FnOnce() -> bool,
    ) -> bool {
        let mut inner = self.lock();
        if loaded() {
            return false;
        }
        if let Some(prev) = inner.column_of.insert(task.id(), column) {
            remove_from(&mut inner.by_column, prev, task.id());
        }
        inner.by_column.entry(column).or_default().push(Arc::clone(task));
        true
    }

    /// Drop the entry for a task that reached a terminal state.
    pub(crate) fn forget(&self, id: u64) {
        let mut inner = self.lock();
        if let Some(column) = inner.column_of.remove(&id) {
            remove_from(&mut inner.by_column, column, id);
        }
    }

    pub(crate) fn take_column(&self, column: Column) -> Vec<Arc<BuildTask>> {
        let mut inner = self.lock();
        let tasks = inner.by_column.remove(&column).unwrap_or_default();
        for t in &tasks {
            inner.column_of.remove(&t.id());
        }
        tasks
    }

    pub(crate) fn drain(&self) -> Vec<Arc<BuildTask>> {
        let mut inner = self.lock();
        inner.column_of.clear();
        inner.by_column.drain().flat_map(|(_, v)| v).collect()
    }

    /// Entries currently held. Finished tasks remove themselves.
    pub(crate) fn len(&self) -> usize {
        self.lock().column_of.len()
    }
}

fn remove_from(by_column: &mut HashMap<Column, Vec<Arc<BuildTask>>>, column: Column, id: u64) {
    if let Some(v) = by_column.get_mut(&column) {
        v.retain(|t| t.id() != id);
        if v.is_empty() {
            by_column.remove(&column);
        }
    }
}
