//! Load and store barrier lowering.
//!
//! | access | barrier       | lowering                                        |
//! |--------|---------------|-------------------------------------------------|
//! | store  | none          | raw store in place                              |
//! | store  | always        | raw store and one barrier call in place         |
//! | store  | unknown       | split on `IsHeapObject`, barrier on heap side   |
//! | load   | none          | raw load in place                               |
//! | load   | always/unknown| split on the GC state flag if read barriers on  |
//!
//! The relative order of the raw store and the write-barrier call follows
//! [`BarrierOrdering`].

use smallvec::smallvec;
use strata_core::{fatal, CompileError};
use tracing::debug;

use super::{BlockCursor, MemoryLowering, Split};
use crate::config::BarrierOrdering;
use crate::ir::{
    Barrier, CmpCondition, ControlFlowGraph, EdgeKind, GateRef, GateType, MachineType,
    MemoryAttribute, OpCode,
};
use crate::runtime::RuntimeStub;

/// Operands shared by abstract loads and stores.
#[derive(Clone, Copy)]
struct Access {
    depend: GateRef,
    glue: GateRef,
    base: GateRef,
    offset: GateRef,
}

impl MemoryLowering<'_> {
    fn access(&self, g: GateRef) -> Access {
        let c = self.builder.circuit();
        Access {
            depend: c.depend_in(g, 0),
            glue: c.value_in(g, 0),
            base: c.value_in(g, 1),
            offset: c.value_in(g, 2),
        }
    }

    // =========================================================================
    // Loads
    // =========================================================================

    pub(super) fn lower_load(
        &mut self,
        g: GateRef,
        attr: MemoryAttribute,
        cursor: &mut BlockCursor,
        cfg: &mut ControlFlowGraph,
    ) {
        let access = self.access(g);
        let machine_type = self.builder.circuit().machine_type(g);

        if attr.barrier == Barrier::NoBarrier || !self.config.read_barrier {
            let addr = self.builder.ptr_add(access.base, access.offset);
            self.builder
                .circuit_mut()
                .rewrite_gate(g, OpCode::RawLoad, machine_type, &[access.depend, addr]);
            self.place_in_line(cursor, g);
            return;
        }

        // Is concurrent marking active?
        self.builder.set_position(cursor.state, access.depend);
        let flag_offset = self.builder.int_ptr(self.config.layout.gc_state_offset);
        let flag_addr = self.builder.ptr_add(access.glue, flag_offset);
        let flag = self.builder.load(MachineType::I8, flag_addr, GateType::Raw);
        let zero = self
            .builder
            .circuit_mut()
            .constant(MachineType::I8, 0, GateType::Raw);
        let marking = self.builder.icmp(CmpCondition::Ne, flag, zero);
        let after_flag = self.builder.depend();
        let branch = self.branch(marking);

        self.open_arm(branch.if_true, after_flag);
        let barrier = self.builder.call(
            RuntimeStub::ReadBarrier,
            &[access.glue, access.base, access.offset],
        );
        let marked = self.close_arm(branch.if_true);

        self.open_arm(branch.if_false, after_flag);
        let addr = self.builder.ptr_add(access.base, access.offset);
        let gate_type = self.builder.circuit().gate_type(g);
        let raw = self.builder.load(machine_type, addr, gate_type);
        let unmarked = self.close_arm(branch.if_false);

        let merge = self.builder.merge(&[branch.if_true, branch.if_false]);
        let depend_selector = self.builder.depend_selector(merge, &[barrier, raw]);
        let mut merge_block = self.builder.take_emitted();
        self.become_value_selector(g, merge, &[barrier, raw], depend_selector);
        merge_block.push(g);

        self.splice(
            cursor,
            cfg,
            Split {
                branch,
                arms: smallvec![marked, unmarked],
                merge_block,
            },
        );
        self.stats.read_barriers += 1;
        debug!(gate = %g, "load lowered with read barrier");
    }

    // =========================================================================
    // Stores
    // =========================================================================

    pub(super) fn lower_store(
        &mut self,
        g: GateRef,
        attr: MemoryAttribute,
        cursor: &mut BlockCursor,
        cfg: &mut ControlFlowGraph,
    ) {
        let access = self.access(g);
        let value = self.builder.circuit().value_in(g, 3);

        // Constants are never heap pointers.
        let barrier = match attr.barrier {
            Barrier::Unknown if self.builder.circuit().constant_value(value).is_some() => {
                Barrier::NoBarrier
            }
            other => other,
        };
        let stub = RuntimeStub::write_barrier(attr.share);

        match (barrier, self.config.barrier_ordering) {
            (Barrier::NoBarrier, _) => {
                let addr = self.builder.ptr_add(access.base, access.offset);
                self.builder.circuit_mut().rewrite_gate(
                    g,
                    OpCode::RawStore,
                    MachineType::NoValue,
                    &[access.depend, addr, value],
                );
                self.place_in_line(cursor, g);
            }
            (Barrier::NeedsBarrier, BarrierOrdering::PostWrite) => {
                self.store_then_barrier(g, access, value, stub, cursor);
            }
            (Barrier::NeedsBarrier, BarrierOrdering::StoreAtBarrier) => {
                self.barrier_then_store(g, access, value, stub, cursor);
            }
            (Barrier::Unknown, ordering) => {
                self.checked_barrier(g, access, value, stub, ordering, cursor, cfg);
            }
        }
        debug!(gate = %g, ?barrier, share = ?attr.share, "store lowered");
    }

    /// Raw store, then the barrier sees the written value.
    fn store_then_barrier(
        &mut self,
        g: GateRef,
        access: Access,
        value: GateRef,
        stub: RuntimeStub,
        cursor: &mut BlockCursor,
    ) {
        let addr = self.builder.ptr_add(access.base, access.offset);
        let stored = self.stored_value(value);
        self.builder.circuit_mut().rewrite_gate(
            g,
            OpCode::RawStore,
            MachineType::NoValue,
            &[access.depend, addr, stored],
        );
        self.place_in_line(cursor, g);

        self.builder.set_depend(g);
        let barrier_value = self.barrier_value(stored);
        let call = self
            .builder
            .call(stub, &[access.glue, access.base, access.offset, barrier_value]);
        self.builder
            .circuit_mut()
            .relink_uses(g, EdgeKind::Depend, call, &[call]);
        cursor.gates.extend(self.builder.take_emitted());
        self.stats.barrier_calls += 1;
    }

    /// Barrier first so the collector can snapshot the old slot value,
    /// then the raw store.
    fn barrier_then_store(
        &mut self,
        g: GateRef,
        access: Access,
        value: GateRef,
        stub: RuntimeStub,
        cursor: &mut BlockCursor,
    ) {
        self.builder.set_depend(access.depend);
        let barrier_value = self.barrier_value(value);
        let call = self
            .builder
            .call(stub, &[access.glue, access.base, access.offset, barrier_value]);
        let addr = self.builder.ptr_add(access.base, access.offset);
        self.builder.circuit_mut().rewrite_gate(
            g,
            OpCode::RawStore,
            MachineType::NoValue,
            &[call, addr, value],
        );
        self.place_in_line(cursor, g);
        self.stats.barrier_calls += 1;
    }

    /// Barrier only if the stored value turns out to be a heap object.
    /// `g` becomes the merge's depend selector.
    #[allow(clippy::too_many_arguments)]
    fn checked_barrier(
        &mut self,
        g: GateRef,
        access: Access,
        value: GateRef,
        stub: RuntimeStub,
        ordering: BarrierOrdering,
        cursor: &mut BlockCursor,
        cfg: &mut ControlFlowGraph,
    ) {
        self.builder.set_position(cursor.state, access.depend);

        let (branch, heap, other, effects) = match ordering {
            BarrierOrdering::PostWrite => {
                let addr = self.builder.ptr_add(access.base, access.offset);
                let compressed = self.stored_value(value);
                let stored = self.builder.store(addr, compressed);
                let is_heap = self.builder.is_heap_object(value);
                let branch = self.branch(is_heap);

                self.open_arm(branch.if_true, stored);
                let barrier_value = self.barrier_value(compressed);
                let call = self
                    .builder
                    .call(stub, &[access.glue, access.base, access.offset, barrier_value]);
                let heap = self.close_arm(branch.if_true);
                let other = self.close_arm(branch.if_false);

                (branch, heap, other, [call, stored])
            }
            BarrierOrdering::StoreAtBarrier => {
                let is_heap = self.builder.is_heap_object(value);
                let branch = self.branch(is_heap);

                self.open_arm(branch.if_true, access.depend);
                let barrier_value = self.barrier_value(value);
                self.builder
                    .call(stub, &[access.glue, access.base, access.offset, barrier_value]);
                let addr = self.builder.ptr_add(access.base, access.offset);
                let heap_store = self.builder.store(addr, value);
                let heap = self.close_arm(branch.if_true);

                self.open_arm(branch.if_false, access.depend);
                let addr = self.builder.ptr_add(access.base, access.offset);
                let plain_store = self.builder.store(addr, value);
                let other = self.close_arm(branch.if_false);

                (branch, heap, other, [heap_store, plain_store])
            }
        };

        let merge = self.builder.merge(&[branch.if_true, branch.if_false]);
        let mut merge_block = self.builder.take_emitted();
        let mut ins = vec![merge];
        ins.extend_from_slice(&effects);
        self.builder.circuit_mut().rewrite_gate(
            g,
            OpCode::DependSelector(2),
            MachineType::NoValue,
            &ins,
        );
        merge_block.push(g);

        self.splice(
            cursor,
            cfg,
            Split {
                branch,
                arms: smallvec![heap, other],
                merge_block,
            },
        );
        self.stats.type_checks += 1;
        self.stats.barrier_calls += 1;
    }

    /// What a post-write store puts in the slot. Tagged values are
    /// compressed to `I32` when pointer compression is on.
    fn stored_value(&mut self, value: GateRef) -> GateRef {
        let c = self.builder.circuit();
        let compress = self.config.compressed_pointers
            && c.machine_type(value) == MachineType::I64
            && c.gate_type(value).may_be_heap_object();
        if compress {
            self.builder.trunc(value, MachineType::I32)
        } else {
            value
        }
    }

    /// Barrier stubs take integers of at least a byte as they are and
    /// floating-point values as `F64`.
    fn barrier_value(&mut self, value: GateRef) -> GateRef {
        let machine_type = self.builder.circuit().machine_type(value);
        match machine_type {
            MachineType::F32 => self.builder.fext(value),
            t if t.is_float() => value,
            t if t.is_int() && t.bits().is_some_and(|bits| bits >= 8) => value,
            t => fatal(CompileError::UnsupportedMachineType {
                context: "write barrier value",
                machine_type: t.to_string(),
            }),
        }
    }
}
