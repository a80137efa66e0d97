//! Compilation error taxonomy.
//!
//! Every error here describes a compiler bug, never a problem with user
//! input. Passes do not recover from them: verification helpers return
//! them as values so tests and debug checks can inspect them, and pass
//! code hands them to [`fatal`] which aborts the compilation.

use thiserror::Error;

/// Result alias for verification helpers.
pub type Result<T> = core::result::Result<T, CompileError>;

/// Internal invariant violations detected by the IR or a lowering pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("gate #{gate} ({op}): expected {expected} inputs, found {found}")]
    ArityMismatch {
        gate: u32,
        op: String,
        expected: usize,
        found: usize,
    },

    #[error("gate #{gate} ({op}): {kind} input {index} out of range (arity {arity})")]
    EdgeOutOfRange {
        gate: u32,
        op: String,
        kind: &'static str,
        index: usize,
        arity: usize,
    },

    #[error("gate #{gate} references missing gate #{input}")]
    DanglingEdge { gate: u32, input: u32 },

    #[error("use list of gate #{gate} is out of sync with the inputs of #{user}")]
    UseListMismatch { gate: u32, user: u32 },

    #[error("loop header #{loop_header} has no paired depend selector")]
    MissingDependSelector { loop_header: u32 },

    #[error("resume point #{gate} is malformed: {reason}")]
    MalformedResumePoint { gate: u32, reason: &'static str },

    #[error("backward walk from #{gate} did not reach the function entry")]
    EntryUnreachable { gate: u32 },

    #[error("{pass}: unexpected opcode {op} at gate #{gate}")]
    UnexpectedOpcode {
        pass: &'static str,
        gate: u32,
        op: String,
    },

    #[error("{context}: unsupported machine type {machine_type}")]
    UnsupportedMachineType {
        context: &'static str,
        machine_type: String,
    },

    #[error("stub {stub} takes {expected} arguments, got {found}")]
    StubArgumentCount {
        stub: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("gate #{gate} is placed in more than one block")]
    DuplicatePlacement { gate: u32 },

    #[error("block {block} is empty")]
    EmptyBlock { block: u32 },

    #[error("block {block} starts with #{gate}, which is not a state gate")]
    BadBlockHead { block: u32, gate: u32 },

    #[error("abstract memory gate #{gate} survived lowering")]
    AbstractGateRemains { gate: u32 },
}

/// Abort the current compilation with a diagnostic.
///
/// There is no recovery path for invariant violations: the message is
/// logged and the compilation thread panics.
#[cold]
#[track_caller]
pub fn fatal(err: CompileError) -> ! {
    tracing::error!(target: "strata::fatal", "{err}");
    panic!("fatal compiler error: {err}");
}
