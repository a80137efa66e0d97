//! Gate construction helpers for lowering passes.
//!
//! A [`CircuitBuilder`] holds a current position `(state, depend)`. Gates
//! with effects (loads, stores, calls) are chained on the current depend
//! and advance it; control helpers return the new state gates and leave
//! repositioning to the caller.
//!
//! Every non-constant gate created through the builder is recorded so a
//! pass that maintains a block list can place it with
//! [`CircuitBuilder::take_emitted`].

use strata_core::{fatal, CompileError};

use super::circuit::Circuit;
use super::gate::GateRef;
use super::opcode::{CmpCondition, OpCode};
use super::types::{GateType, MachineType};
use crate::runtime::{RuntimeStub, TAGGED_UNDEFINED};

pub struct CircuitBuilder<'a> {
    circuit: &'a mut Circuit,
    state: GateRef,
    depend: GateRef,
    emitted: Vec<GateRef>,
}

impl<'a> CircuitBuilder<'a> {
    /// Builder positioned at the circuit roots.
    pub fn new(circuit: &'a mut Circuit) -> Self {
        let state = circuit.state_root();
        let depend = circuit.depend_root();
        CircuitBuilder {
            circuit,
            state,
            depend,
            emitted: Vec::new(),
        }
    }

    #[inline]
    pub fn circuit(&self) -> &Circuit {
        &*self.circuit
    }

    #[inline]
    pub fn circuit_mut(&mut self) -> &mut Circuit {
        &mut *self.circuit
    }

    // =========================================================================
    // Position
    // =========================================================================

    #[inline]
    pub fn set_position(&mut self, state: GateRef, depend: GateRef) {
        self.state = state;
        self.depend = depend;
    }

    #[inline]
    pub fn state(&self) -> GateRef {
        self.state
    }

    #[inline]
    pub fn depend(&self) -> GateRef {
        self.depend
    }

    #[inline]
    pub fn set_state(&mut self, state: GateRef) {
        self.state = state;
    }

    #[inline]
    pub fn set_depend(&mut self, depend: GateRef) {
        self.depend = depend;
    }

    /// Gates created since the last call, in creation order.
    pub fn take_emitted(&mut self) -> Vec<GateRef> {
        std::mem::take(&mut self.emitted)
    }

    fn emit(&mut self, op: OpCode, machine_type: MachineType, ins: &[GateRef], gate_type: GateType) -> GateRef {
        let g = self.circuit.new_gate(op, machine_type, ins, gate_type);
        self.emitted.push(g);
        g
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn int32(&mut self, value: i32) -> GateRef {
        self.circuit.constant(MachineType::I32, value as i64, GateType::Raw)
    }

    pub fn int64(&mut self, value: i64) -> GateRef {
        self.circuit.constant(MachineType::I64, value, GateType::Raw)
    }

    pub fn int_ptr(&mut self, value: i64) -> GateRef {
        self.circuit.constant(MachineType::ArchPtr, value, GateType::Raw)
    }

    /// The tagged `undefined` value.
    pub fn undefined(&mut self) -> GateRef {
        self.circuit
            .constant(MachineType::I64, TAGGED_UNDEFINED, GateType::TaggedNonPointer)
    }

    // =========================================================================
    // Pure Arithmetic
    // =========================================================================

    pub fn ptr_add(&mut self, base: GateRef, offset: GateRef) -> GateRef {
        self.emit(OpCode::PtrAdd, MachineType::ArchPtr, &[base, offset], GateType::Raw)
    }

    pub fn add(&mut self, machine_type: MachineType, lhs: GateRef, rhs: GateRef) -> GateRef {
        self.emit(OpCode::Add, machine_type, &[lhs, rhs], GateType::Raw)
    }

    pub fn icmp(&mut self, cond: CmpCondition, lhs: GateRef, rhs: GateRef) -> GateRef {
        self.emit(OpCode::Icmp(cond), MachineType::I1, &[lhs, rhs], GateType::Raw)
    }

    pub fn equal(&mut self, lhs: GateRef, rhs: GateRef) -> GateRef {
        self.icmp(CmpCondition::Eq, lhs, rhs)
    }

    pub fn trunc(&mut self, value: GateRef, to: MachineType) -> GateRef {
        let gate_type = self.circuit.gate_type(value);
        self.emit(OpCode::Trunc, to, &[value], gate_type)
    }

    pub fn fext(&mut self, value: GateRef) -> GateRef {
        let gate_type = self.circuit.gate_type(value);
        self.emit(OpCode::FExt, MachineType::F64, &[value], gate_type)
    }

    /// Box a raw integer as a tagged int.
    pub fn tagged_int(&mut self, value: GateRef) -> GateRef {
        self.emit(OpCode::TaggedInt, MachineType::I64, &[value], GateType::TaggedNonPointer)
    }

    pub fn is_heap_object(&mut self, value: GateRef) -> GateRef {
        self.emit(OpCode::IsHeapObject, MachineType::I1, &[value], GateType::Raw)
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Raw load chained on the current depend.
    pub fn load(&mut self, machine_type: MachineType, addr: GateRef, gate_type: GateType) -> GateRef {
        let depend = self.depend;
        let g = self.emit(OpCode::RawLoad, machine_type, &[depend, addr], gate_type);
        self.depend = g;
        g
    }

    /// Raw store chained on the current depend.
    pub fn store(&mut self, addr: GateRef, value: GateRef) -> GateRef {
        let depend = self.depend;
        let g = self.emit(OpCode::RawStore, MachineType::NoValue, &[depend, addr, value], GateType::Empty);
        self.depend = g;
        g
    }

    /// Runtime stub call chained on the current depend. `args` starts with
    /// the glue pointer.
    pub fn call(&mut self, stub: RuntimeStub, args: &[GateRef]) -> GateRef {
        if args.len() != stub.argc() as usize {
            fatal(CompileError::StubArgumentCount {
                stub: stub.name(),
                expected: stub.argc() as usize,
                found: args.len(),
            });
        }
        let gate_type = if stub.is_allocator() {
            GateType::TaggedPointer
        } else if stub.is_write_barrier() {
            GateType::Empty
        } else {
            GateType::AnyTagged
        };
        let mut ins = Vec::with_capacity(args.len() + 1);
        ins.push(self.depend);
        ins.extend_from_slice(args);
        let op = OpCode::Call {
            stub,
            argc: stub.argc(),
        };
        let g = self.emit(op, stub.return_type(), &ins, gate_type);
        self.depend = g;
        g
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Branch on `cond` from the current state. Returns the true and false
    /// projections.
    pub fn branch(&mut self, cond: GateRef) -> (GateRef, GateRef) {
        let state = self.state;
        let branch = self.emit(OpCode::IfBranch, MachineType::NoValue, &[state, cond], GateType::Empty);
        let if_true = self.emit(OpCode::IfTrue, MachineType::NoValue, &[branch], GateType::Empty);
        let if_false = self.emit(OpCode::IfFalse, MachineType::NoValue, &[branch], GateType::Empty);
        (if_true, if_false)
    }

    pub fn merge(&mut self, states: &[GateRef]) -> GateRef {
        self.emit(OpCode::Merge(states.len() as u16), MachineType::NoValue, states, GateType::Empty)
    }

    pub fn value_selector(
        &mut self,
        head: GateRef,
        machine_type: MachineType,
        values: &[GateRef],
        gate_type: GateType,
    ) -> GateRef {
        let mut ins = Vec::with_capacity(values.len() + 1);
        ins.push(head);
        ins.extend_from_slice(values);
        self.emit(OpCode::ValueSelector(values.len() as u16), machine_type, &ins, gate_type)
    }

    pub fn depend_selector(&mut self, head: GateRef, depends: &[GateRef]) -> GateRef {
        let mut ins = Vec::with_capacity(depends.len() + 1);
        ins.push(head);
        ins.extend_from_slice(depends);
        self.emit(OpCode::DependSelector(depends.len() as u16), MachineType::NoValue, &ins, GateType::Empty)
    }

    /// Re-anchor the effect chain `depend` under the control gate `state`.
    pub fn depend_relay(&mut self, state: GateRef, depend: GateRef) -> GateRef {
        self.emit(OpCode::DependRelay, MachineType::NoValue, &[state, depend], GateType::Empty)
    }

    pub fn ret(&mut self, value: GateRef) -> GateRef {
        let (state, depend) = (self.state, self.depend);
        self.emit(OpCode::Return, MachineType::NoValue, &[state, depend, value], GateType::Empty)
    }
}
