//! Circuit lowering backend.
//!
//! Lowers a gate circuit to a scheduled block list with:
//! - Resume dispatch for generator and async functions
//! - Inline allocation fast paths
//! - Write and read barrier expansion
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod ir;
pub mod lower;
pub mod pipeline;
pub mod runtime;

pub use config::{BarrierOrdering, LoweringConfig};
pub use context::{CompilationContext, MemoryLoweringStats, ResumeStats};
pub use pipeline::{compile_function, Scheduler};
