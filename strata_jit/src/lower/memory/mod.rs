//! Post-schedule lowering of allocations and barrier-classified memory
//! accesses.
//!
//! Runs after scheduling, so every gate it creates must also be placed.
//! The pass streams over the scheduled blocks in order and rebuilds the
//! block list as it goes:
//!
//! - **In place**: the abstract gate becomes a concrete operation (a stub
//!   call, a raw load or store) and its helper gates are placed right
//!   before or after it in the current block.
//! - **Split**: the current block is closed with a branch, the arm blocks
//!   follow it, and scanning continues inside a new merge block. The
//!   abstract gate itself becomes the merge's value or depend selector,
//!   so its consumers never need relinking.
//!
//! ```text
//!   before                after
//!   ┌────────┐            ┌──────────────┐
//!   │ head   │            │ head         │
//!   │ a      │            │ a            │
//!   │ alloc  │   ──►      │ loads, cmp   │
//!   │ b      │            │ branch       │
//!   └────────┘            └──────────────┘
//!                          ┌────┐  ┌────┐
//!                          │fast│  │slow│
//!                          └────┘  └────┘
//!                         ┌──────────────┐
//!                         │ merge        │
//!                         │ dsel, alloc  │
//!                         │ b            │
//!                         └──────────────┘
//! ```
//!
//! Only gates of the original schedule are scanned; gates the pass
//! creates are already concrete.

mod alloc;
mod barrier;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use strata_core::{fatal, CompileError};
use tracing::{info, instrument, trace};

use crate::config::LoweringConfig;
use crate::context::{CompilationContext, MemoryLoweringStats};
use crate::ir::{BitSet, Circuit, CircuitBuilder, ControlFlowGraph, EdgeKind, GateRef, OpCode};

/// The block being rebuilt and its current control position.
struct BlockCursor {
    gates: Vec<GateRef>,
    /// Last state-producing gate placed in `gates`.
    state: GateRef,
}

/// The branch that ends the current block, with the helpers placed
/// before it.
struct Branch {
    pre: Vec<GateRef>,
    gate: GateRef,
    if_true: GateRef,
    if_false: GateRef,
}

/// A block split produced by one lowering.
struct Split {
    branch: Branch,
    /// Arm blocks in emission order, each opened by its projection.
    arms: SmallVec<[Vec<GateRef>; 2]>,
    /// The merge block so far: the merge gate first, then its selectors.
    merge_block: Vec<GateRef>,
}

pub struct MemoryLowering<'c> {
    builder: CircuitBuilder<'c>,
    config: LoweringConfig,
    stats: MemoryLoweringStats,
    visited: BitSet,
}

impl<'c> MemoryLowering<'c> {
    pub fn new(circuit: &'c mut Circuit, config: LoweringConfig) -> Self {
        let visited = BitSet::with_capacity(circuit.len());
        MemoryLowering {
            builder: CircuitBuilder::new(circuit),
            config,
            stats: MemoryLoweringStats::default(),
            visited,
        }
    }

    /// Lower every abstract memory gate placed in `cfg`.
    pub fn run(mut self, cfg: &mut ControlFlowGraph) -> MemoryLoweringStats {
        for (index, block) in cfg.take_blocks().into_iter().enumerate() {
            let Some(head) = block.head() else {
                fatal(CompileError::EmptyBlock {
                    block: index as u32,
                });
            };
            let mut cursor = BlockCursor {
                gates: Vec::with_capacity(block.len()),
                state: head,
            };

            for g in block.into_gates() {
                if !self.visited.insert(g.as_usize()) {
                    fatal(CompileError::DuplicatePlacement { gate: g.index() });
                }
                self.stats.visited += 1;

                match self.builder.circuit().op(g) {
                    OpCode::HeapAlloc(region) => self.lower_heap_alloc(g, region, &mut cursor, cfg),
                    OpCode::Load(attr) => self.lower_load(g, attr, &mut cursor, cfg),
                    OpCode::Store(attr) => self.lower_store(g, attr, &mut cursor, cfg),
                    op => {
                        cursor.gates.push(g);
                        if op.produces_state() {
                            cursor.state = g;
                        }
                    }
                }
            }

            cfg.push_block(cursor.gates);
        }

        self.stats
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Place the helpers emitted so far, then the rewritten gate.
    fn place_in_line(&mut self, cursor: &mut BlockCursor, g: GateRef) {
        cursor.gates.extend(self.builder.take_emitted());
        cursor.gates.push(g);
    }

    /// Branch on `cond` from the builder's state. Everything emitted
    /// since the last placement goes before the branch.
    fn branch(&mut self, cond: GateRef) -> Branch {
        let pre = self.builder.take_emitted();
        let (if_true, if_false) = self.builder.branch(cond);
        let gate = self.builder.circuit().state_in(if_true, 0);
        // Placed by `splice` and `close_arm`.
        self.builder.take_emitted();
        Branch {
            pre,
            gate,
            if_true,
            if_false,
        }
    }

    /// Open an arm block at `proj` with its effects chained on `depend`.
    fn open_arm(&mut self, proj: GateRef, depend: GateRef) {
        self.builder.set_position(proj, depend);
    }

    /// The arm block opened by `proj`: the projection and everything
    /// emitted since [`Self::open_arm`].
    fn close_arm(&mut self, proj: GateRef) -> Vec<GateRef> {
        let mut gates = vec![proj];
        gates.extend(self.builder.take_emitted());
        gates
    }

    /// Close the current block with `split.branch`, append the arm blocks,
    /// and continue in the merge block.
    ///
    /// State users of the cursor's position that are not part of the
    /// closed block now follow the merge instead.
    fn splice(&mut self, cursor: &mut BlockCursor, cfg: &mut ControlFlowGraph, split: Split) {
        let state = cursor.state;
        let merge = split.merge_block[0];

        cursor.gates.extend(split.branch.pre);
        cursor.gates.push(split.branch.gate);
        let closed = std::mem::take(&mut cursor.gates);

        let circuit = self.builder.circuit_mut();
        let keep: FxHashSet<GateRef> = closed
            .iter()
            .copied()
            .chain(circuit.selectors_of(state))
            .collect();
        for edge in circuit.use_edges(state) {
            if edge.kind == EdgeKind::State && !keep.contains(&edge.user) {
                circuit.replace_in(edge.user, edge.kind, edge.index, merge);
            }
        }

        cfg.push_block(closed);
        for arm in split.arms {
            cfg.push_block(arm);
        }

        trace!(state = %state, merge = %merge, "block split");
        self.stats.splits += 1;
        cursor.gates = split.merge_block;
        cursor.state = merge;
    }

    /// Turn `g` into the merge's value selector over `values`, moving its
    /// effect users to `depend_selector`.
    fn become_value_selector(&mut self, g: GateRef, merge: GateRef, values: &[GateRef], depend_selector: GateRef) {
        let circuit = self.builder.circuit_mut();
        circuit.relink_uses(g, EdgeKind::Depend, depend_selector, &[]);

        let mut ins: SmallVec<[GateRef; 3]> = SmallVec::new();
        ins.push(merge);
        ins.extend_from_slice(values);
        let machine_type = circuit.machine_type(g);
        circuit.rewrite_gate(
            g,
            OpCode::ValueSelector(values.len() as u16),
            machine_type,
            &ins,
        );
    }
}

/// Check that no abstract memory gate is still placed.
pub fn verify_lowered(circuit: &Circuit, cfg: &ControlFlowGraph) -> strata_core::Result<()> {
    match cfg
        .placed_gates()
        .find(|&g| circuit.op(g).is_abstract_memory())
    {
        Some(g) => Err(CompileError::AbstractGateRemains { gate: g.index() }),
        None => Ok(()),
    }
}

/// Lower allocations and barriers in `cfg` in place.
#[instrument(skip_all, fields(method = %ctx.method_name))]
pub fn lower_memory_operations(
    ctx: &mut CompilationContext,
    circuit: &mut Circuit,
    cfg: &mut ControlFlowGraph,
) {
    let stats = MemoryLowering::new(circuit, ctx.config.clone()).run(cfg);
    info!(%stats, blocks = cfg.len(), "memory operations lowered");
    ctx.memory_stats = stats;
}
