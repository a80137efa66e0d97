//! Circuit fixtures shared by the integration tests.

#![allow(dead_code)]

use strata_jit::ir::{
    Circuit, ControlFlowGraph, EdgeKind, GateRef, GateType, MachineType, MemoryAttribute, OpCode,
    RegionFlag,
};

// =============================================================================
// Suspendable functions
// =============================================================================

/// A suspendable function under construction. Argument 0 is the resume
/// context.
pub struct Generator {
    pub circuit: Circuit,
    pub ctx: GateRef,
}

/// One `Suspend`/`Resume` pair.
#[derive(Debug, Clone, Copy)]
pub struct YieldPoint {
    pub suspend: GateRef,
    pub resume: GateRef,
    pub offset: i64,
}

/// A counted loop: `header`, its effect phi and the exit test.
#[derive(Debug, Clone, Copy)]
pub struct LoopShape {
    pub header: GateRef,
    pub effects: GateRef,
    pub branch: GateRef,
    pub body: GateRef,
    pub exit: GateRef,
}

impl Generator {
    pub fn new() -> Self {
        let mut circuit = Circuit::new();
        let ctx = circuit.new_gate(OpCode::Argument(0), MachineType::I64, &[], GateType::AnyTagged);
        Generator { circuit, ctx }
    }

    /// `yield` at bytecode `offset`, continuing from `state` and `depend`.
    pub fn yield_at(&mut self, state: GateRef, depend: GateRef, offset: i64) -> YieldPoint {
        let c = &mut self.circuit;
        let k = c.constant(MachineType::I64, offset, GateType::Raw);
        let suspend = c.new_gate(OpCode::Suspend, MachineType::NoValue, &[state, depend, k], GateType::Empty);
        let resume = c.new_gate(
            OpCode::Resume,
            MachineType::NoValue,
            &[suspend, suspend, self.ctx],
            GateType::AnyTagged,
        );
        YieldPoint {
            suspend,
            resume,
            offset,
        }
    }

    /// Open a loop entered from `state` with effects `depend`. The back
    /// edge is added by [`Generator::close_loop`].
    pub fn open_loop(&mut self, state: GateRef, depend: GateRef) -> LoopShape {
        let c = &mut self.circuit;
        let header = c.new_gate(OpCode::LoopBegin(1), MachineType::NoValue, &[state], GateType::Empty);
        let effects = c.new_gate(OpCode::DependSelector(1), MachineType::NoValue, &[header, depend], GateType::Empty);
        let cond = c.new_gate(OpCode::Argument(1), MachineType::I1, &[], GateType::Raw);
        let branch = c.new_gate(OpCode::IfBranch, MachineType::NoValue, &[header, cond], GateType::Empty);
        let body = c.new_gate(OpCode::IfTrue, MachineType::NoValue, &[branch], GateType::Empty);
        let exit = c.new_gate(OpCode::IfFalse, MachineType::NoValue, &[branch], GateType::Empty);
        LoopShape {
            header,
            effects,
            branch,
            body,
            exit,
        }
    }

    /// Close `shape` with a back edge from `state` carrying `depend`.
    pub fn close_loop(&mut self, shape: LoopShape, state: GateRef, depend: GateRef) -> GateRef {
        let c = &mut self.circuit;
        let back = c.new_gate(OpCode::LoopBack, MachineType::NoValue, &[state], GateType::Empty);
        c.append_input(shape.header, EdgeKind::State, back);
        c.append_input(shape.effects, EdgeKind::Depend, depend);
        back
    }

    /// Return `undefined` from `state`.
    pub fn ret(&mut self, state: GateRef, depend: GateRef) -> GateRef {
        let c = &mut self.circuit;
        let undef = c.constant(MachineType::I64, 2, GateType::TaggedNonPointer);
        c.new_gate(OpCode::Return, MachineType::NoValue, &[state, depend, undef], GateType::Empty)
    }
}

/// `n` yields in straight-line code, offsets `10, 20, ...`.
pub fn straight_line(n: usize) -> (Generator, Vec<YieldPoint>) {
    let mut g = Generator::new();
    let mut state = g.circuit.state_root();
    let mut depend = g.circuit.depend_root();
    let mut points = Vec::with_capacity(n);

    for i in 0..n {
        let p = g.yield_at(state, depend, 10 * (i as i64 + 1));
        state = p.resume;
        depend = p.resume;
        points.push(p);
    }
    g.ret(state, depend);
    (g, points)
}

/// `while cond { yield@offsets[0]; yield@offsets[1]; ... }`
pub fn yield_in_loop(offsets: &[i64]) -> (Generator, LoopShape, Vec<YieldPoint>) {
    let mut g = Generator::new();
    let root = g.circuit.state_root();
    let dep = g.circuit.depend_root();

    let shape = g.open_loop(root, dep);
    let (mut state, mut depend) = (shape.body, shape.effects);
    let mut points = Vec::with_capacity(offsets.len());
    for &offset in offsets {
        let p = g.yield_at(state, depend, offset);
        state = p.resume;
        depend = p.resume;
        points.push(p);
    }
    g.close_loop(shape, state, depend);
    g.ret(shape.exit, shape.effects);
    (g, shape, points)
}

/// `i = 0; while cond { yield@offset; i = i + 1 }`. Also returns the
/// counter's `ValueSelector`.
pub fn counting_loop(offset: i64) -> (Generator, LoopShape, GateRef, YieldPoint) {
    let mut g = Generator::new();
    let root = g.circuit.state_root();
    let dep = g.circuit.depend_root();

    let shape = g.open_loop(root, dep);
    let zero = g.circuit.constant(MachineType::I64, 0, GateType::Raw);
    let counter = g.circuit.new_gate(
        OpCode::ValueSelector(1),
        MachineType::I64,
        &[shape.header, zero],
        GateType::Raw,
    );
    let p = g.yield_at(shape.body, shape.effects, offset);

    let c = &mut g.circuit;
    let one = c.constant(MachineType::I64, 1, GateType::Raw);
    let next = c.new_gate(OpCode::Add, MachineType::I64, &[counter, one], GateType::Raw);
    c.append_input(counter, EdgeKind::Value, next);
    g.close_loop(shape, p.resume, p.resume);
    g.ret(shape.exit, shape.effects);
    (g, shape, counter, p)
}

/// `while a { while b { yield@offset } }`. Returns the outer loop first.
pub fn yield_in_nested_loops(offset: i64) -> (Generator, LoopShape, LoopShape, YieldPoint) {
    let mut g = Generator::new();
    let root = g.circuit.state_root();
    let dep = g.circuit.depend_root();

    let outer = g.open_loop(root, dep);
    let inner = g.open_loop(outer.body, outer.effects);
    let p = g.yield_at(inner.body, inner.effects, offset);
    g.close_loop(inner, p.resume, p.resume);
    g.close_loop(outer, inner.exit, inner.effects);
    g.ret(outer.exit, outer.effects);
    (g, outer, inner, p)
}

/// Resume points and their suspends, as the translator reports them.
pub fn related(points: &[YieldPoint]) -> Vec<GateRef> {
    points.iter().flat_map(|p| [p.suspend, p.resume]).collect()
}

// =============================================================================
// Scheduled memory code
// =============================================================================

/// One abstract memory operation in a scheduled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Alloc(RegionFlag),
    Load(MemoryAttribute),
    /// Store of a constant (`true`) or of an unknown tagged value.
    Store(MemoryAttribute, bool),
}

pub struct MemoryFunction {
    pub circuit: Circuit,
    pub cfg: ControlFlowGraph,
    /// The abstract gates, in schedule order.
    pub memory: Vec<GateRef>,
    /// Every gate the scheduler placed.
    pub placed: Vec<GateRef>,
    pub ret: GateRef,
}

/// A chain of blocks, each opened by `IfSuccess` of the previous block's
/// head, holding `blocks[i]` in order with one effect chain through all
/// of them. The last block returns.
pub fn memory_function(blocks: &[Vec<MemOp>]) -> MemoryFunction {
    let mut c = Circuit::new();
    let glue = c.new_gate(OpCode::Argument(0), MachineType::ArchPtr, &[], GateType::Raw);
    let obj = c.new_gate(OpCode::Argument(1), MachineType::I64, &[], GateType::TaggedPointer);
    let value = c.new_gate(OpCode::Argument(2), MachineType::I64, &[], GateType::AnyTagged);
    let offset = c.constant(MachineType::ArchPtr, 8, GateType::Raw);
    let size = c.constant(MachineType::I64, 24, GateType::Raw);
    let small = c.constant(MachineType::I64, 6, GateType::TaggedNonPointer);

    let mut depend = c.depend_root();
    let mut head = c.state_root();
    let mut scheduled = Vec::with_capacity(blocks.len().max(1));
    let mut memory = Vec::new();

    for (i, ops) in blocks.iter().enumerate() {
        if i > 0 {
            head = c.new_gate(OpCode::IfSuccess, MachineType::NoValue, &[head], GateType::Empty);
        }
        let mut gates = vec![head];
        for op in ops {
            let g = match *op {
                MemOp::Alloc(region) => c.new_gate(
                    OpCode::HeapAlloc(region),
                    MachineType::I64,
                    &[depend, glue, size],
                    GateType::TaggedPointer,
                ),
                MemOp::Load(attr) => c.new_gate(
                    OpCode::Load(attr),
                    MachineType::I64,
                    &[depend, glue, obj, offset],
                    GateType::AnyTagged,
                ),
                MemOp::Store(attr, constant) => {
                    let stored = if constant { small } else { value };
                    c.new_gate(
                        OpCode::Store(attr),
                        MachineType::NoValue,
                        &[depend, glue, obj, offset, stored],
                        GateType::Empty,
                    )
                }
            };
            depend = g;
            gates.push(g);
            memory.push(g);
        }
        scheduled.push(gates);
    }
    if scheduled.is_empty() {
        scheduled.push(vec![head]);
    }

    let undef = c.constant(MachineType::I64, 2, GateType::TaggedNonPointer);
    let ret = c.new_gate(OpCode::Return, MachineType::NoValue, &[head, depend, undef], GateType::Empty);
    if let Some(last) = scheduled.last_mut() {
        last.push(ret);
    }

    let placed = scheduled.iter().flatten().copied().collect();
    MemoryFunction {
        circuit: c,
        cfg: ControlFlowGraph::from_blocks(scheduled),
        memory,
        placed,
        ret,
    }
}

/// Placed gates whose opcode satisfies `pred`.
pub fn placed_where(circuit: &Circuit, cfg: &ControlFlowGraph, pred: impl Fn(OpCode) -> bool) -> Vec<GateRef> {
    cfg.placed_gates().filter(|&g| pred(circuit.op(g))).collect()
}
