//! Gate definitions.
//!
//! A gate is one operation in the circuit. Its inputs form a single flat
//! list laid out as `[state..., depend..., value...]`; the split points are
//! derived from the opcode's [`Arity`](super::opcode::Arity) so a gate never
//! stores them separately.

use smallvec::SmallVec;

use super::arena::Id;
use super::opcode::{EdgeKind, OpCode};
use super::types::{GateType, MachineType};

/// Identifier of a gate within its circuit.
pub type GateRef = Id<Gate>;

/// Flat input storage. Most gates have four inputs or fewer.
pub type GateInputs = SmallVec<[GateRef; 4]>;

// =============================================================================
// Gate
// =============================================================================

#[derive(Clone)]
pub struct Gate {
    /// The operation this gate performs.
    pub(crate) op: OpCode,

    /// Physical result representation.
    pub(crate) machine_type: MachineType,

    /// Semantic result tag.
    pub(crate) gate_type: GateType,

    /// State, depend and value inputs, in that order.
    pub(crate) ins: GateInputs,

    /// Bytecode offset this gate was translated from, for dumps.
    pub(crate) bc_offset: u32,
}

impl Gate {
    pub(crate) fn new(
        op: OpCode,
        machine_type: MachineType,
        ins: GateInputs,
        gate_type: GateType,
    ) -> Self {
        Gate {
            op,
            machine_type,
            gate_type,
            ins,
            bc_offset: 0,
        }
    }

    #[inline]
    pub fn op(&self) -> OpCode {
        self.op
    }

    #[inline]
    pub fn machine_type(&self) -> MachineType {
        self.machine_type
    }

    #[inline]
    pub fn gate_type(&self) -> GateType {
        self.gate_type
    }

    #[inline]
    pub fn bc_offset(&self) -> u32 {
        self.bc_offset
    }

    /// All inputs in storage order.
    #[inline]
    pub fn inputs(&self) -> &[GateRef] {
        &self.ins
    }

    /// The inputs of one edge kind.
    pub fn inputs_of(&self, kind: EdgeKind) -> &[GateRef] {
        let arity = self.op.arity();
        let start = arity.start(kind);
        &self.ins[start..start + arity.count(kind)]
    }

    /// The constant payload, if this gate is a constant.
    #[inline]
    pub fn as_constant(&self) -> Option<i64> {
        match self.op {
            OpCode::Constant(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.op, OpCode::Constant(_))
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.op, self.machine_type)?;
        let arity = self.op.arity();
        for kind in [EdgeKind::State, EdgeKind::Depend, EdgeKind::Value] {
            if arity.count(kind) > 0 {
                write!(f, " {}{:?}", kind.name(), self.inputs_of(kind))?;
            }
        }
        Ok(())
    }
}
