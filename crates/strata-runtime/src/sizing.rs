/// Rough size of one scratch build buffer, used to turn a memory budget into a count.
pub const BUILDER_BYTES_ESTIMATE: u64 = 10_485_760;

/// Worker-thread and builder-pool sizes derived from memory and core count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSizing {
    /// Builders the memory budget could afford.
    pub memory_cap: usize,
    /// Thread count before the single-threaded cutoff is applied.
    pub thread_budget: usize,
    /// Background threads to spawn; zero means single-threaded mode.
    pub worker_threads: usize,
    pub builder_capacity: usize,
}

impl PoolSizing {
    pub fn compute(max_memory_bytes: u64, cores: usize) -> Self {
        let memory_cap = ((max_memory_bytes as f64 * 0.3) as u64 / BUILDER_BYTES_ESTIMATE)
            .clamp(1, usize::MAX as u64) as usize;
        let thread_budget = cores.max(1).min(memory_cap / 5).max(1);
        Self::from_budget(memory_cap, thread_budget)
    }

    fn from_budget(memory_cap: usize, thread_budget: usize) -> Self {
        Self {
            memory_cap,
            thread_budget,
            worker_threads: if thread_budget > 1 { thread_budget } else { 0 },
            builder_capacity: thread_budget.saturating_mul(10).clamp(1, memory_cap),
        }
    }

    /// Apply explicit thread and builder counts on top of the computed policy.
    pub fn with_overrides(self, threads: Option<usize>, builders: Option<usize>) -> Self {
        let mut out = match threads {
            Some(n) => Self::from_budget(self.memory_cap, n.max(1)),
            None => self,
        };
        if let Some(b) = builders {
            out.builder_capacity = b.max(1);
        }
        out
    }

    #[inline]
    pub fn single_threaded(&self) -> bool {
        self.worker_threads == 0
    }
}
