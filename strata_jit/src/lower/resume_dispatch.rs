//! Resume dispatch reconstruction for suspendable functions.
//!
//! A generator or async function re-enters its body at the point it last
//! suspended. The translator emits each resume point as a `Resume` gate
//! hanging off the `Suspend` that saved its bytecode offset. This pass
//! gives those points real control-flow predecessors:
//!
//! ```text
//!                    entry
//!                      │
//!          ctx == undefined ?
//!          ┌───────────┴───────────┐
//!     fresh start            load saved offset
//!    (original body)                │
//!                         saved == K₀ ? ──true──► resume point 0
//!                                   │false
//!                         saved == K₁ ? ──true──► loop dispatch merge
//!                                   │false               │
//!                           return undefined       loop header
//!                                                        │
//!                                               K₁ == phi ? ──true──► resume point 1
//!                                                        │false
//!                                                   loop body
//! ```
//!
//! A resume point inside a loop cannot be entered from outside without
//! passing through the loop header, or the loop's phis would have no value
//! on that edge. Each enclosing loop therefore gains one extra header
//! input fed by a dispatch merge, plus a phi that is `-1` on every
//! original edge and the saved offset on the dispatch edge. An equality
//! chain right after the header routes the dispatch path to the next
//! inner loop or to the resume point itself. Normal iterations see `-1`
//! and fall through the chain.
//!
//! The loop structure is analysed on the unmodified circuit before any
//! rewrite, so later resume points never walk through edges the pass
//! created for earlier ones.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strata_core::{fatal, CompileError};
use tracing::{debug, info, instrument, trace};

use crate::context::{CompilationContext, ResumeStats};
use crate::ir::{
    BitSet, Circuit, CircuitBuilder, EdgeKind, GateRef, GateType, MachineType, OpCode,
};
use crate::runtime::RuntimeLayout;

/// Loop phi value on every non-dispatch edge. Never a valid bytecode
/// offset.
pub const DISPATCH_SENTINEL: i32 = -1;

// =============================================================================
// Translator Interface
// =============================================================================

/// Where the function body starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub state: GateRef,
    pub depend: GateRef,
}

impl EntryPoint {
    /// The effective entry of `circuit`: the roots, or the implicit
    /// safepoint check the translator placed right after them.
    pub fn recover(circuit: &Circuit) -> Self {
        let root = circuit.state_root();
        let check = circuit.uses(root).iter().copied().find(|&u| {
            circuit.op(u) == OpCode::CheckSafepoint && circuit.state_in(u, 0) == root
        });
        match check {
            Some(check) => EntryPoint {
                state: check,
                depend: check,
            },
            None => EntryPoint {
                state: root,
                depend: circuit.depend_root(),
            },
        }
    }
}

/// What the translator reports about a suspendable function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendableFunction {
    /// Resume points and the gates that restore state around them, in
    /// translation order. Only `Resume` gates drive dispatch.
    pub resume_related: Vec<GateRef>,
    pub entry: EntryPoint,
    /// The argument holding the generator object, `undefined` on a fresh
    /// call.
    pub resume_context: GateRef,
}

impl SuspendableFunction {
    pub fn new(circuit: &Circuit, resume_related: Vec<GateRef>, resume_context: GateRef) -> Self {
        SuspendableFunction {
            resume_related,
            entry: EntryPoint::recover(circuit),
            resume_context,
        }
    }
}

// =============================================================================
// Pass
// =============================================================================

/// One resume point with the loops enclosing it, innermost first.
#[derive(Debug, Clone)]
struct ResumePoint {
    resume: GateRef,
    suspend: GateRef,
    loops: SmallVec<[GateRef; 2]>,
}

/// Dispatch structure added to one loop header.
#[derive(Debug, Clone, Copy)]
struct LoopDispatch {
    merge: GateRef,
    phi: GateRef,
    /// Last false projection of the in-loop equality chain. The loop
    /// body hangs off it.
    tail: GateRef,
}

pub struct ResumeDispatch<'c> {
    builder: CircuitBuilder<'c>,
    layout: RuntimeLayout,
    /// Loop header → gates of its body, by backward reachability from
    /// the back edges.
    bodies: FxHashMap<GateRef, BitSet>,
    dispatch: FxHashMap<GateRef, LoopDispatch>,
    stats: ResumeStats,
}

impl<'c> ResumeDispatch<'c> {
    pub fn new(circuit: &'c mut Circuit, layout: RuntimeLayout) -> Self {
        ResumeDispatch {
            builder: CircuitBuilder::new(circuit),
            layout,
            bodies: FxHashMap::default(),
            dispatch: FxHashMap::default(),
            stats: ResumeStats::default(),
        }
    }

    /// Rebuild dispatch for `func` and return what was done.
    pub fn run(mut self, func: &SuspendableFunction) -> ResumeStats {
        let points = self.collect_resume_points(func);
        self.stats.resume_points = points.len();

        let dispatch = self.split_entry(func.entry, func.resume_context);
        let restore = self.load_saved_offset(dispatch, func.entry.depend, func.resume_context);

        let mut entry_tail = dispatch;
        for point in &points {
            let k = self.resume_offset(point.suspend);
            let (mut incoming, f) = self.extend_chain(entry_tail, restore, k, false);
            entry_tail = f;

            let mut dispatch_value = restore;
            for &header in point.loops.iter().rev() {
                let d = self.enter_loop(header, incoming, dispatch_value, restore);
                let (t, f) = self.extend_chain(d.tail, k, d.phi, true);
                if let Some(d) = self.dispatch.get_mut(&header) {
                    d.tail = f;
                }
                incoming = t;
                dispatch_value = d.phi;
            }

            self.wire_resume(point.resume, incoming, restore, func.resume_context);
            debug!(
                resume = %point.resume,
                loops = point.loops.len(),
                "resume point wired into dispatch"
            );
        }

        // No saved offset matched.
        self.builder.set_position(entry_tail, restore);
        let undefined = self.builder.undefined();
        self.builder.ret(undefined);

        self.stats
    }

    // =========================================================================
    // Analysis
    // =========================================================================

    fn collect_resume_points(&mut self, func: &SuspendableFunction) -> Vec<ResumePoint> {
        let resumes: Vec<GateRef> = func
            .resume_related
            .iter()
            .copied()
            .filter(|&g| self.circuit().op(g) == OpCode::Resume)
            .collect();

        resumes
            .into_iter()
            .map(|resume| {
                let suspend = self.suspend_of(resume);
                let loops = self.enclosing_loops(resume, func.entry.state);
                ResumePoint {
                    resume,
                    suspend,
                    loops,
                }
            })
            .collect()
    }

    /// The `Suspend` feeding `resume`, directly or through `IfSuccess`.
    fn suspend_of(&self, resume: GateRef) -> GateRef {
        let c = self.circuit();
        let mut pred = c.state_in(resume, 0);
        if c.op(pred) == OpCode::IfSuccess {
            pred = c.state_in(pred, 0);
        }
        if c.op(pred) != OpCode::Suspend {
            fatal(CompileError::MalformedResumePoint {
                gate: resume.index(),
                reason: "state predecessor is not a suspend",
            });
        }
        pred
    }

    /// Walk state input 0 back to the entry, collecting loop headers whose
    /// body contains `resume`.
    fn enclosing_loops(&mut self, resume: GateRef, entry: GateRef) -> SmallVec<[GateRef; 2]> {
        let mut loops = SmallVec::new();
        let mut cur = self.circuit().state_in(resume, 0);
        let limit = self.circuit().len();

        for _ in 0..=limit {
            if cur == entry {
                return loops;
            }
            let op = self.circuit().op(cur);
            if matches!(op, OpCode::LoopBegin(_)) && self.loop_body(cur).contains(resume.as_usize()) {
                trace!(header = %cur, resume = %resume, "resume point inside loop");
                loops.push(cur);
            }
            if op.arity().state == 0 {
                break;
            }
            cur = self.circuit().state_in(cur, 0);
        }

        fatal(CompileError::EntryUnreachable {
            gate: resume.index(),
        })
    }

    fn loop_body(&mut self, header: GateRef) -> &BitSet {
        if !self.bodies.contains_key(&header) {
            let body = compute_loop_body(self.builder.circuit(), header);
            self.bodies.insert(header, body);
        }
        &self.bodies[&header]
    }

    // =========================================================================
    // Rewriting
    // =========================================================================

    /// Branch on "resume context is undefined" at the entry. The original
    /// body moves to the true side. Returns the false side.
    fn split_entry(&mut self, entry: EntryPoint, ctx: GateRef) -> GateRef {
        let body_edges: Vec<_> = self
            .circuit()
            .use_edges(entry.state)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::State && self.circuit().op(e.user) != OpCode::StateSplit)
            .collect();

        self.builder.set_position(entry.state, entry.depend);
        let undefined = self.builder.undefined();
        let is_fresh = self.builder.equal(ctx, undefined);
        let (fresh_start, dispatch) = self.builder.branch(is_fresh);

        let circuit = self.builder.circuit_mut();
        for edge in body_edges {
            circuit.replace_in(edge.user, edge.kind, edge.index, fresh_start);
        }
        dispatch
    }

    /// Load the saved bytecode offset from the generator context.
    fn load_saved_offset(&mut self, dispatch: GateRef, depend: GateRef, ctx: GateRef) -> GateRef {
        let relay = self.builder.depend_relay(dispatch, depend);
        self.builder.set_position(dispatch, relay);

        let context_offset = self.builder.int_ptr(self.layout.generator_context_offset);
        let context_addr = self.builder.ptr_add(ctx, context_offset);
        let context = self
            .builder
            .load(MachineType::I64, context_addr, GateType::AnyTagged);

        let bc_offset = self.builder.int_ptr(self.layout.generator_bc_offset_offset);
        let bc_addr = self.builder.ptr_add(context, bc_offset);
        self.builder.load(MachineType::I32, bc_addr, GateType::Raw)
    }

    /// The resume point's bytecode offset as an `I32` value.
    fn resume_offset(&mut self, suspend: GateRef) -> GateRef {
        let offset = self.circuit().value_in(suspend, 0);
        match self.circuit().constant_value(offset) {
            Some(v) => self.builder.int32(v as i32),
            None if self.circuit().machine_type(offset) == MachineType::I32 => offset,
            None => self.builder.trunc(offset, MachineType::I32),
        }
    }

    /// Append `lhs == rhs` to the chain ending at `tail`. With `relink`,
    /// whatever hung off `tail` moves to the new false projection.
    fn extend_chain(&mut self, tail: GateRef, lhs: GateRef, rhs: GateRef, relink: bool) -> (GateRef, GateRef) {
        self.builder.set_state(tail);
        let cond = self.builder.equal(lhs, rhs);
        let (t, f) = self.builder.branch(cond);
        self.stats.dispatch_branches += 1;

        if relink {
            let circuit = self.builder.circuit_mut();
            let branch = circuit.state_in(t, 0);
            let mut keep = circuit.selectors_of(tail);
            keep.push(branch);
            circuit.relink_uses(tail, EdgeKind::State, f, &keep);
        }
        (t, f)
    }

    /// Route `incoming` into `header`'s dispatch merge, creating the merge
    /// and phi on first use.
    fn enter_loop(&mut self, header: GateRef, incoming: GateRef, dispatch_value: GateRef, restore: GateRef) -> LoopDispatch {
        if let Some(&d) = self.dispatch.get(&header) {
            self.builder
                .circuit_mut()
                .append_input(d.merge, EdgeKind::State, incoming);
            return d;
        }

        let OpCode::LoopBegin(original_edges) = self.circuit().op(header) else {
            fatal(CompileError::UnexpectedOpcode {
                pass: "resume dispatch",
                gate: header.index(),
                op: self.circuit().op(header).to_string(),
            });
        };
        let selectors = self.circuit().selectors_of(header);
        if !selectors
            .iter()
            .any(|&s| matches!(self.circuit().op(s), OpCode::DependSelector(_)))
        {
            fatal(CompileError::MissingDependSelector {
                loop_header: header.index(),
            });
        }

        let merge = self.builder.merge(&[incoming]);
        let undefined = self.builder.undefined();
        let circuit = self.builder.circuit_mut();
        circuit.append_input(header, EdgeKind::State, merge);
        for s in selectors {
            if matches!(circuit.op(s), OpCode::DependSelector(_)) {
                // The saved-offset load dominates the merge and follows the
                // entry depend, so resumed iterations see it ordered first.
                circuit.append_input(s, EdgeKind::Depend, restore);
            } else {
                circuit.append_input(s, EdgeKind::Value, undefined);
            }
        }

        let sentinel = self.builder.int32(DISPATCH_SENTINEL);
        let mut values: SmallVec<[GateRef; 4]> =
            SmallVec::from_elem(sentinel, original_edges as usize);
        values.push(dispatch_value);
        let phi = self
            .builder
            .value_selector(header, MachineType::I32, &values, GateType::Raw);

        let d = LoopDispatch {
            merge,
            phi,
            tail: header,
        };
        self.dispatch.insert(header, d);
        self.stats.dispatch_loops += 1;
        trace!(header = %header, merge = %merge, phi = %phi, "loop dispatch created");
        d
    }

    /// Make `incoming` the resume point's only way in.
    fn wire_resume(&mut self, resume: GateRef, incoming: GateRef, restore: GateRef, ctx: GateRef) {
        let relay = self.builder.depend_relay(incoming, restore);
        let circuit = self.builder.circuit_mut();
        circuit.replace_state_in(resume, 0, incoming);
        circuit.replace_depend_in(resume, 0, relay);
        circuit.replace_value_in(resume, 0, ctx);
    }

    #[inline]
    fn circuit(&self) -> &Circuit {
        self.builder.circuit()
    }
}

/// Gates reachable backward over state edges from `header`'s back edges
/// without passing through `header`.
fn compute_loop_body(circuit: &Circuit, header: GateRef) -> BitSet {
    let mut body = BitSet::with_capacity(circuit.len());
    let mut worklist: Vec<GateRef> = circuit.gate(header).inputs_of(EdgeKind::State)[1..].to_vec();

    while let Some(g) = worklist.pop() {
        if g == header || !body.insert(g.as_usize()) {
            continue;
        }
        worklist.extend_from_slice(circuit.gate(g).inputs_of(EdgeKind::State));
    }
    body
}

/// Rebuild resume dispatch for `func` in place.
#[instrument(skip_all, fields(method = %ctx.method_name))]
pub fn reconstruct_resume_dispatch(
    ctx: &mut CompilationContext,
    circuit: &mut Circuit,
    func: &SuspendableFunction,
) {
    let stats = ResumeDispatch::new(circuit, ctx.config.layout).run(func);
    info!(
        resume_points = stats.resume_points,
        loops = stats.dispatch_loops,
        branches = stats.dispatch_branches,
        "resume dispatch rebuilt"
    );
    ctx.resume_stats = stats;
}

// =============================================================================
// Tests
// =============================================================================
