//! Per-compilation state threaded through the lowering passes.

use std::fmt;

use crate::config::LoweringConfig;

/// Counters recorded by the resume dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeStats {
    /// Resume points wired into dispatch.
    pub resume_points: usize,
    /// Loop headers that gained a dispatch edge.
    pub dispatch_loops: usize,
    /// Equality branches emitted, entry and in-loop chains combined.
    pub dispatch_branches: usize,
}

/// Counters recorded by the memory lowering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryLoweringStats {
    /// Gates inspected.
    pub visited: usize,
    pub allocations: usize,
    pub inline_allocations: usize,
    pub barrier_calls: usize,
    pub read_barriers: usize,
    /// `IsHeapObject` checks emitted for unknown barriers.
    pub type_checks: usize,
    /// Blocks split into branch, fast, slow and merge.
    pub splits: usize,
}

impl fmt::Display for MemoryLoweringStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "visited={} allocs={} (inline {}) barriers={} read_barriers={} checks={} splits={}",
            self.visited,
            self.allocations,
            self.inline_allocations,
            self.barrier_calls,
            self.read_barriers,
            self.type_checks,
            self.splits
        )
    }
}

/// Compilation context for one method.
#[derive(Debug, Clone)]
pub struct CompilationContext {
    pub method_name: String,
    pub config: LoweringConfig,
    /// Dump the circuit after each pass at `debug` level.
    pub enable_log: bool,
    pub resume_stats: ResumeStats,
    pub memory_stats: MemoryLoweringStats,
}

impl CompilationContext {
    pub fn new(method_name: impl Into<String>, config: LoweringConfig) -> Self {
        Self {
            method_name: method_name.into(),
            config,
            enable_log: false,
            resume_stats: ResumeStats::default(),
            memory_stats: MemoryLoweringStats::default(),
        }
    }

    pub fn with_log(mut self, enable_log: bool) -> Self {
        self.enable_log = enable_log;
        self
    }
}
