use std::any::Any;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use strata_mesh::MeshError;
use strata_world::ChunkCoord;

/// Returned by blocking queue and pool calls once they have been closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadError {
    pub message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gpu upload failed: {}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Unexpected failure while building or uploading a chunk.
#[derive(Clone, Debug)]
pub enum BuildError {
    Mesh(MeshError),
    Upload(UploadError),
    Panicked(String),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Mesh(e) => write!(f, "{}", e),
            BuildError::Upload(e) => write!(f, "{}", e),
            BuildError::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Mesh(e) => Some(e),
            BuildError::Upload(e) => Some(e),
            BuildError::Panicked(_) => None,
        }
    }
}

impl From<MeshError> for BuildError {
    fn from(e: MeshError) -> Self {
        BuildError::Mesh(e)
    }
}

impl From<UploadError> for BuildError {
    fn from(e: UploadError) -> Self {
        BuildError::Upload(e)
    }
}

/// A fatal pipeline failure, handed to the host for its crash path.
#[derive(Clone, Debug)]
pub struct CrashReport {
    pub description: &'static str,
    pub coord: Option<ChunkCoord>,
    pub thread: String,
    pub error: BuildError,
}

impl CrashReport {
    pub(crate) fn here(description: &'static str, coord: Option<ChunkCoord>, error: BuildError) -> Self {
        Self {
            description,
            coord,
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            error,
        }
    }
}

impl std::fmt::Display for CrashReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description)?;
        if let Some(c) = self.coord {
            write!(f, " chunk {}", c)?;
        }
        write!(f, " on thread '{}': {}", self.thread, self.error)
    }
}

impl std::error::Error for CrashReport {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Clone, Debug)]
pub enum PipelineError {
    WrongThread { expected: ThreadId, actual: ThreadId },
    Crashed(CrashReport),
    Spawn(String),
    Config(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::WrongThread { expected, actual } => write!(
                f,
                "graphics-thread call made from {:?} (graphics thread is {:?})",
                actual, expected
            ),
            PipelineError::Crashed(report) => write!(f, "chunk pipeline crashed: {}", report),
            PipelineError::Spawn(msg) => write!(f, "failed to start chunk workers: {}", msg),
            PipelineError::Config(msg) => write!(f, "invalid pipeline config: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Holds the first fatal report; later ones are logged and dropped.
#[derive(Default)]
pub(crate) struct CrashLatch {
    crashed: AtomicBool,
    report: Mutex<Option<CrashReport>>,
}

impl CrashLatch {
    pub(crate) fn record(&self, report: CrashReport) -> bool {
        log::error!(target: "pipeline", "{}", report);
        let mut slot = self.report.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(report);
        self.crashed.store(true, Ordering::Release);
        true
    }

    #[inline]
    pub(crate) fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::Acquire)
    }

    pub(crate) fn report(&self) -> Option<CrashReport> {
        self.report.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
