use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::Interrupted;
use crate::task::BuildTask;

/// Totally ordered task priority (lower first).
#[derive(Clone, Copy, Debug)]
struct Priority(f64);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

type Key = (Priority, u64);

fn key_of(task: &BuildTask) -> Key {
    (Priority(task.priority()), task.id())
}

struct QueueInner {
    tasks: BTreeMap<Key, Arc<BuildTask>>,
    closed: bool,
}

/// Blocking priority queue of pending build tasks; ties go to the older task.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: BTreeMap::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hands the task back if the queue is closed.
    pub fn offer(&self, task: Arc<BuildTask>) -> Result<(), Arc<BuildTask>> {
        let mut q = self.lock();
        if q.closed {
            return Err(task);
        }
        q.tasks.insert(key_of(&task), task);
        drop(q);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a task is available or the queue is closed.
    pub fn take(&self) -> Result<Arc<BuildTask>, Interrupted> {
        let mut q = self.lock();
        loop {
            if q.closed {
                return Err(Interrupted);
            }
            if let Some((_, task)) = q.tasks.pop_first() {
                return Ok(task);
            }
            q = self.ready.wait(q).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn poll(&self) -> Option<Arc<BuildTask>> {
        self.lock().tasks.pop_first().map(|(_, t)| t)
    }

    pub fn remove(&self, task: &BuildTask) -> bool {
        self.remove_key(task.priority(), task.id())
    }

    pub(crate) fn remove_key(&self, priority: f64, id: u64) -> bool {
        self.lock().tasks.remove(&(Priority(priority), id)).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Remove every queued task. The caller finishes them after the lock is gone.
    pub fn drain(&self) -> Vec<Arc<BuildTask>> {
        std::mem::take(&mut self.lock().tasks).into_values().collect()
    }

    /// Refuse further offers, wake every blocked `take`, and hand back what was queued.
    pub fn close(&self) -> Vec<Arc<BuildTask>> {
        let drained = {
            let mut q = self.lock();
            q.closed = true;
            std::mem::take(&mut q.tasks)
        };
        self.ready.notify_all();
        drained.into_values().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
