//! Per-function lowering pipeline.
//!
//! ```text
//! circuit ──► resume dispatch (suspendable only) ──► scheduler ──► memory lowering ──► cfg
//! ```
//!
//! Scheduling is not part of this crate; callers plug theirs in through
//! [`Scheduler`].

use strata_core::fatal;
use tracing::{debug, info_span};

use crate::context::CompilationContext;
use crate::ir::{Circuit, ControlFlowGraph};
use crate::lower::{lower_memory_operations, reconstruct_resume_dispatch, verify_lowered, SuspendableFunction};

/// Places the gates of a circuit into ordered basic blocks.
pub trait Scheduler {
    fn schedule(&mut self, circuit: &Circuit) -> ControlFlowGraph;
}

impl<F> Scheduler for F
where
    F: FnMut(&Circuit) -> ControlFlowGraph,
{
    fn schedule(&mut self, circuit: &Circuit) -> ControlFlowGraph {
        self(circuit)
    }
}

/// Lower one function from its raw circuit to a block list ready for
/// emission.
pub fn compile_function(
    ctx: &mut CompilationContext,
    circuit: &mut Circuit,
    suspendable: Option<&SuspendableFunction>,
    scheduler: &mut impl Scheduler,
) -> ControlFlowGraph {
    let _span = info_span!("compile_function", method = %ctx.method_name).entered();

    if let Some(func) = suspendable {
        reconstruct_resume_dispatch(ctx, circuit, func);
        check(ctx, "resume dispatch", circuit, None);
    }

    let mut cfg = scheduler.schedule(circuit);
    if cfg!(debug_assertions) {
        if let Err(err) = cfg.verify(circuit) {
            fatal(err);
        }
    }

    lower_memory_operations(ctx, circuit, &mut cfg);
    check(ctx, "memory lowering", circuit, Some(&cfg));

    cfg
}

/// Verify after a pass in debug builds, and dump when logging is on.
fn check(ctx: &CompilationContext, pass: &'static str, circuit: &Circuit, cfg: Option<&ControlFlowGraph>) {
    if cfg!(debug_assertions) {
        let result = circuit.verify().and_then(|()| match cfg {
            Some(cfg) => cfg.verify(circuit).and_then(|()| verify_lowered(circuit, cfg)),
            None => Ok(()),
        });
        if let Err(err) = result {
            fatal(err);
        }
    }

    if ctx.enable_log {
        debug!(pass, method = %ctx.method_name, "after {pass}:\n{circuit:?}");
    }
}
