//! Core support shared by the Strata backend crates.
//!
//! - **Errors** (`error.rs`): the invariant-violation taxonomy and the
//!   abort helper used by every lowering pass
//! - **Logging** (`logging.rs`): one-time `tracing` subscriber setup

pub mod error;
pub mod logging;

pub use error::{fatal, CompileError, Result};
