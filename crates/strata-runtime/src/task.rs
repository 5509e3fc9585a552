use std::sync::{Arc, Mutex, MutexGuard};

use strata_mesh::{BuildKind, CompiledChunk};
use strata_world::ChunkCoord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Compiling,
    Uploading,
    Done,
    Finished,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Finished)
    }

    /// The single forward step a task may take without being cancelled.
    pub fn successor(self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Pending => Some(TaskStatus::Compiling),
            TaskStatus::Compiling => Some(TaskStatus::Uploading),
            TaskStatus::Uploading => Some(TaskStatus::Done),
            TaskStatus::Done | TaskStatus::Finished => None,
        }
    }
}

/// Runs once, under the task lock, when the task reaches DONE or FINISHED.
/// It receives the terminal status and must not lock the task again.
pub type FinishCallback = Box<dyn FnOnce(TaskStatus) + Send>;

struct TaskState {
    status: TaskStatus,
    callbacks: Vec<FinishCallback>,
}

impl TaskState {
    fn enter_terminal(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        for cb in std::mem::take(&mut self.callbacks) {
            cb(status);
        }
    }
}

/// One unit of chunk work and its lifecycle.
pub struct BuildTask {
    id: u64,
    coord: ChunkCoord,
    kind: BuildKind,
    priority: f64,
    previous: Option<Arc<CompiledChunk>>,
    state: Mutex<TaskState>,
}

impl BuildTask {
    pub fn new(id: u64, coord: ChunkCoord, kind: BuildKind, priority: f64) -> Self {
        Self {
            id,
            coord,
            kind,
            priority,
            previous: None,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                callbacks: Vec::new(),
            }),
        }
    }

    /// Attach the geometry a transparency resort works from.
    pub fn with_previous(mut self, compiled: Arc<CompiledChunk>) -> Self {
        self.previous = Some(compiled);
        self
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    #[inline]
    pub fn kind(&self) -> BuildKind {
        self.kind
    }

    /// Lower is more urgent.
    #[inline]
    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn previous(&self) -> Option<&Arc<CompiledChunk>> {
        self.previous.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        // Callbacks run under this lock; a panic in one must not wedge the task.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    /// Compare-and-set one forward step. On mismatch returns the status found.
    pub fn advance(&self, from: TaskStatus, to: TaskStatus) -> Result<(), TaskStatus> {
        debug_assert_eq!(from.successor(), Some(to), "illegal task transition");
        let mut st = self.lock();
        if st.status != from || from.successor() != Some(to) {
            return Err(st.status);
        }
        if to.is_terminal() {
            st.enter_terminal(to);
        } else {
            st.status = to;
        }
        Ok(())
    }

    /// PENDING to COMPILING, gated by `admit` evaluated under the task lock.
    /// `Ok(false)` leaves the task PENDING.
    pub(crate) fn begin_compile(&self, admit: impl FnOnce() -> bool) -> Result<bool, TaskStatus> {
        let mut st = self.lock();
        if st.status != TaskStatus::Pending {
            return Err(st.status);
        }
        if !admit() {
            return Ok(false);
        }
        st.status = TaskStatus::Compiling;
        Ok(true)
    }

    /// UPLOADING to DONE; `publish` runs under the task lock before callbacks fire.
    pub(crate) fn complete(&self, publish: impl FnOnce()) -> Result<(), TaskStatus> {
        let mut st = self.lock();
        if st.status != TaskStatus::Uploading {
            return Err(st.status);
        }
        publish();
        st.enter_terminal(TaskStatus::Done);
        Ok(())
    }

    /// Cancel. Returns true if this call moved the task to FINISHED.
    pub fn finish(&self) -> bool {
        let mut st = self.lock();
        if st.status.is_terminal() {
            return false;
        }
        st.enter_terminal(TaskStatus::Finished);
        true
    }

    /// Register a completion hook. Runs immediately if the task is already terminal.
    pub fn add_finish_callback(&self, cb: FinishCallback) {
        let mut st = self.lock();
        if st.status.is_terminal() {
            cb(st.status);
        } else {
            st.callbacks.push(cb);
        }
    }
}

impl std::fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildTask")
            .field("id", &self.id)
            .field("coord", &self.coord)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .finish()
    }
}
