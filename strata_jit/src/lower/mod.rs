//! Lowering passes.
//!
//! - **Resume dispatch** (`resume_dispatch.rs`): runs on the unscheduled
//!   circuit of suspendable functions
//! - **Memory** (`memory/`): runs on the scheduled circuit and rewrites
//!   the block list as it splits blocks

pub mod memory;
pub mod resume_dispatch;

pub use memory::{lower_memory_operations, verify_lowered, MemoryLowering};
pub use resume_dispatch::{
    reconstruct_resume_dispatch, EntryPoint, ResumeDispatch, SuspendableFunction,
    DISPATCH_SENTINEL,
};
