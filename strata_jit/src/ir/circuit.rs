//! The circuit: all gates of one function plus their reverse edges.
//!
//! The circuit provides:
//! - **Arena storage**: gates addressed by [`GateRef`], never freed mid-pass
//! - **Use lists**: every forward edge has exactly one reverse entry
//! - **Edge relinking**: a single primitive updates both directions
//! - **Roots**: the unique state and depend entry gates
//!
//! Edge relinking during a rewrite goes through [`Circuit::use_edges`],
//! which returns a snapshot, so callers can mutate while iterating.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strata_core::{fatal, CompileError};

use super::arena::{Arena, SecondaryMap};
use super::gate::{Gate, GateInputs, GateRef};
use super::opcode::{EdgeKind, OpCode};
use super::types::{GateType, MachineType};

/// One edge as seen from the gate it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseEdge {
    pub user: GateRef,
    pub kind: EdgeKind,
    /// Index within the user's edge list of `kind`.
    pub index: usize,
}

// =============================================================================
// Circuit
// =============================================================================

#[derive(Clone)]
pub struct Circuit {
    gates: Arena<Gate>,

    /// For each gate, one entry per edge that points at it.
    uses: SecondaryMap<Gate, Vec<GateRef>>,

    state_root: GateRef,
    depend_root: GateRef,

    /// Constant gates are shared: one gate per (type, bits, tag).
    constants: FxHashMap<(MachineType, i64, GateType), GateRef>,

    /// Bytecode offset stamped on newly created gates.
    next_bc_offset: u32,
}

impl Circuit {
    /// Create a circuit holding only the state and depend roots.
    pub fn new() -> Self {
        let mut gates = Arena::with_capacity(256);
        let state_root = gates.alloc(Gate::new(
            OpCode::StateEntry,
            MachineType::NoValue,
            GateInputs::new(),
            GateType::Empty,
        ));
        let depend_root = gates.alloc(Gate::new(
            OpCode::DependEntry,
            MachineType::NoValue,
            GateInputs::new(),
            GateType::Empty,
        ));

        Circuit {
            gates,
            uses: SecondaryMap::new(),
            state_root,
            depend_root,
            constants: FxHashMap::default(),
            next_bc_offset: 0,
        }
    }

    #[inline]
    pub fn state_root(&self) -> GateRef {
        self.state_root
    }

    #[inline]
    pub fn depend_root(&self) -> GateRef {
        self.depend_root
    }

    // =========================================================================
    // Gate Access
    // =========================================================================

    #[inline]
    pub fn gate(&self, g: GateRef) -> &Gate {
        &self.gates[g]
    }

    #[inline]
    pub fn get(&self, g: GateRef) -> Option<&Gate> {
        self.gates.get(g)
    }

    #[inline]
    pub fn op(&self, g: GateRef) -> OpCode {
        self.gates[g].op
    }

    #[inline]
    pub fn machine_type(&self, g: GateRef) -> MachineType {
        self.gates[g].machine_type
    }

    #[inline]
    pub fn gate_type(&self, g: GateRef) -> GateType {
        self.gates[g].gate_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gates.len() <= 2
    }

    pub fn iter(&self) -> impl Iterator<Item = (GateRef, &Gate)> {
        self.gates.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = GateRef> {
        self.gates.ids()
    }

    /// Set the bytecode offset recorded on gates created from now on.
    pub fn set_bc_offset(&mut self, offset: u32) {
        self.next_bc_offset = offset;
    }

    // =========================================================================
    // Gate Creation
    // =========================================================================

    /// Create a gate. The input count must match the opcode's arity.
    pub fn new_gate(
        &mut self,
        op: OpCode,
        machine_type: MachineType,
        ins: &[GateRef],
        gate_type: GateType,
    ) -> GateRef {
        let expected = op.arity().total();
        if ins.len() != expected {
            fatal(CompileError::ArityMismatch {
                gate: self.gates.len() as u32,
                op: op.to_string(),
                expected,
                found: ins.len(),
            });
        }
        self.check_inputs_exist(self.gates.len() as u32, ins);

        let mut gate = Gate::new(op, machine_type, GateInputs::from_slice(ins), gate_type);
        gate.bc_offset = self.next_bc_offset;
        let g = self.gates.alloc(gate);
        for &input in ins {
            self.add_use(input, g);
        }
        g
    }

    /// The shared constant gate for `value`, created on first request.
    pub fn constant(&mut self, machine_type: MachineType, value: i64, gate_type: GateType) -> GateRef {
        if let Some(&g) = self.constants.get(&(machine_type, value, gate_type)) {
            return g;
        }
        let g = self.new_gate(OpCode::Constant(value), machine_type, &[], gate_type);
        self.constants.insert((machine_type, value, gate_type), g);
        g
    }

    fn check_inputs_exist(&self, gate: u32, ins: &[GateRef]) {
        for &input in ins {
            if input.as_usize() >= self.gates.len() {
                fatal(CompileError::DanglingEdge {
                    gate,
                    input: input.index(),
                });
            }
        }
    }

    // =========================================================================
    // Edge Access
    // =========================================================================

    /// Input `index` of `kind`. Indexing past the declared arity aborts.
    pub fn input(&self, g: GateRef, kind: EdgeKind, index: usize) -> GateRef {
        let gate = &self.gates[g];
        let arity = gate.op.arity();
        let count = arity.count(kind);
        if index >= count {
            fatal(CompileError::EdgeOutOfRange {
                gate: g.index(),
                op: gate.op.to_string(),
                kind: kind.name(),
                index,
                arity: count,
            });
        }
        gate.ins[arity.start(kind) + index]
    }

    #[inline]
    pub fn state_in(&self, g: GateRef, index: usize) -> GateRef {
        self.input(g, EdgeKind::State, index)
    }

    #[inline]
    pub fn depend_in(&self, g: GateRef, index: usize) -> GateRef {
        self.input(g, EdgeKind::Depend, index)
    }

    #[inline]
    pub fn value_in(&self, g: GateRef, index: usize) -> GateRef {
        self.input(g, EdgeKind::Value, index)
    }

    // =========================================================================
    // Use Lists
    // =========================================================================

    /// Gates with an edge to `g`, one entry per edge.
    pub fn uses(&self, g: GateRef) -> &[GateRef] {
        self.uses.get(g).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn use_count(&self, g: GateRef) -> usize {
        self.uses(g).len()
    }

    /// Snapshot of every edge pointing at `g`.
    pub fn use_edges(&self, g: GateRef) -> Vec<UseEdge> {
        let mut users: SmallVec<[GateRef; 8]> = SmallVec::from_slice(self.uses(g));
        users.sort_unstable();
        users.dedup();

        let mut edges = Vec::with_capacity(users.len());
        for user in users {
            let gate = &self.gates[user];
            let arity = gate.op.arity();
            for (position, &input) in gate.ins.iter().enumerate() {
                if input == g {
                    let (kind, index) = arity.kind_at(position);
                    edges.push(UseEdge { user, kind, index });
                }
            }
        }
        edges
    }

    fn add_use(&mut self, def: GateRef, user: GateRef) {
        self.uses.entry(def).push(user);
    }

    fn remove_use(&mut self, def: GateRef, user: GateRef) {
        if let Some(uses) = self.uses.get_mut(def) {
            if let Some(pos) = uses.iter().position(|&u| u == user) {
                uses.swap_remove(pos);
            }
        }
    }

    // =========================================================================
    // Gate Modification
    // =========================================================================

    /// Point input `index` of `kind` at `new`, updating both directions.
    pub fn replace_in(&mut self, g: GateRef, kind: EdgeKind, index: usize, new: GateRef) {
        let old = self.input(g, kind, index);
        self.check_inputs_exist(g.index(), &[new]);
        let position = self.gates[g].op.arity().start(kind) + index;
        self.remove_use(old, g);
        self.gates[g].ins[position] = new;
        self.add_use(new, g);
    }

    #[inline]
    pub fn replace_state_in(&mut self, g: GateRef, index: usize, new: GateRef) {
        self.replace_in(g, EdgeKind::State, index, new);
    }

    #[inline]
    pub fn replace_depend_in(&mut self, g: GateRef, index: usize, new: GateRef) {
        self.replace_in(g, EdgeKind::Depend, index, new);
    }

    #[inline]
    pub fn replace_value_in(&mut self, g: GateRef, index: usize, new: GateRef) {
        self.replace_in(g, EdgeKind::Value, index, new);
    }

    /// Relink every `kind` edge pointing at `old` to `new`, except edges
    /// from the gates in `keep`.
    pub fn relink_uses(&mut self, old: GateRef, kind: EdgeKind, new: GateRef, keep: &[GateRef]) {
        for edge in self.use_edges(old) {
            if edge.kind == kind && !keep.contains(&edge.user) {
                self.replace_in(edge.user, edge.kind, edge.index, new);
            }
        }
    }

    /// Append an input to a variable-arity gate, growing its opcode count.
    pub fn append_input(&mut self, g: GateRef, kind: EdgeKind, input: GateRef) {
        let op = self.gates[g].op;
        let Some(grown) = op.grown(kind) else {
            fatal(CompileError::UnexpectedOpcode {
                pass: "append_input",
                gate: g.index(),
                op: op.to_string(),
            });
        };
        self.check_inputs_exist(g.index(), &[input]);

        let arity = op.arity();
        let position = arity.start(kind) + arity.count(kind);
        let gate = &mut self.gates[g];
        gate.ins.insert(position, input);
        gate.op = grown;
        self.add_use(input, g);
    }

    /// Turn `g` into a different operation in place. The gate keeps its
    /// identity, so every edge pointing at it stays valid.
    pub fn rewrite_gate(&mut self, g: GateRef, op: OpCode, machine_type: MachineType, ins: &[GateRef]) {
        let expected = op.arity().total();
        if ins.len() != expected {
            fatal(CompileError::ArityMismatch {
                gate: g.index(),
                op: op.to_string(),
                expected,
                found: ins.len(),
            });
        }
        self.check_inputs_exist(g.index(), ins);

        let old: GateInputs = std::mem::take(&mut self.gates[g].ins);
        for input in old {
            self.remove_use(input, g);
        }
        let gate = &mut self.gates[g];
        gate.op = op;
        gate.machine_type = machine_type;
        gate.ins = GateInputs::from_slice(ins);
        for &input in ins {
            self.add_use(input, g);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn constant_value(&self, g: GateRef) -> Option<i64> {
        self.gates[g].as_constant()
    }

    /// Selectors bound to the merge or loop header `head`.
    pub fn selectors_of(&self, head: GateRef) -> Vec<GateRef> {
        self.use_edges(head)
            .into_iter()
            .filter(|e| e.kind == EdgeKind::State && self.op(e.user).is_selector())
            .map(|e| e.user)
            .collect()
    }

    /// Gates whose opcode satisfies `pred`, in creation order.
    pub fn collect(&self, pred: impl Fn(OpCode) -> bool) -> Vec<GateRef> {
        self.iter()
            .filter(|(_, gate)| pred(gate.op))
            .map(|(g, _)| g)
            .collect()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check arity, edge targets and use-list consistency.
    pub fn verify(&self) -> strata_core::Result<()> {
        let mut expected: SecondaryMap<Gate, Vec<GateRef>> = SecondaryMap::new();

        for (g, gate) in self.iter() {
            let arity = gate.op.arity().total();
            if gate.ins.len() != arity {
                return Err(CompileError::ArityMismatch {
                    gate: g.index(),
                    op: gate.op.to_string(),
                    expected: arity,
                    found: gate.ins.len(),
                });
            }
            for &input in &gate.ins {
                if input.as_usize() >= self.gates.len() {
                    return Err(CompileError::DanglingEdge {
                        gate: g.index(),
                        input: input.index(),
                    });
                }
                expected.entry(input).push(g);
            }
        }

        for g in self.ids() {
            let mut want = expected.get(g).cloned().unwrap_or_default();
            let mut have = self.uses(g).to_vec();
            want.sort_unstable();
            have.sort_unstable();
            if want != have {
                let user = want
                    .iter()
                    .chain(have.iter())
                    .find(|u| want.contains(*u) != have.contains(*u))
                    .or_else(|| want.first())
                    .copied()
                    .unwrap_or(g);
                return Err(CompileError::UseListMismatch {
                    gate: g.index(),
                    user: user.index(),
                });
            }
        }

        Ok(())
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Circuit ({} gates):", self.gates.len())?;
        for (g, gate) in self.iter() {
            writeln!(f, "  {:?} @{}: {:?}", g, gate.bc_offset, gate)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
