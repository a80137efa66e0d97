//! Heap allocation lowering.
//!
//! Old-space allocations, and every allocation in a sanitizer build, call
//! the region's allocator stub in place. The other regions get an inline
//! bump-pointer fast path:
//!
//! ```text
//!   top_addr = load(glue + top_offset)
//!   end_addr = load(glue + end_offset)
//!   top      = load(top_addr)
//!   end      = load(end_addr)
//!   new_top  = top + size
//!   if new_top > end (unsigned)
//!       slow: result = call allocator(glue, tagged(size))
//!   else
//!       fast: store(top_addr, new_top); result = top
//! ```

use smallvec::smallvec;
use tracing::debug;

use super::{BlockCursor, MemoryLowering, Split};
use crate::ir::{CmpCondition, ControlFlowGraph, GateRef, GateType, MachineType, OpCode, RegionFlag};
use crate::runtime::RuntimeStub;

impl MemoryLowering<'_> {
    pub(super) fn lower_heap_alloc(
        &mut self,
        g: GateRef,
        region: RegionFlag,
        cursor: &mut BlockCursor,
        cfg: &mut ControlFlowGraph,
    ) {
        self.stats.allocations += 1;
        let stub = RuntimeStub::allocator(region);

        let circuit = self.builder.circuit();
        let depend = circuit.depend_in(g, 0);
        let glue = circuit.value_in(g, 0);
        let size = circuit.value_in(g, 1);

        let offsets = match self.config.layout.region(region) {
            Some(offsets) if !self.config.sanitizer => offsets,
            _ => {
                let tagged_size = self.builder.tagged_int(size);
                let op = OpCode::Call {
                    stub,
                    argc: stub.argc(),
                };
                self.builder.circuit_mut().rewrite_gate(
                    g,
                    op,
                    stub.return_type(),
                    &[depend, glue, tagged_size],
                );
                self.place_in_line(cursor, g);
                debug!(gate = %g, ?region, stub = stub.name(), "allocation lowered to runtime call");
                return;
            }
        };

        // Bump-pointer check in the current block.
        self.builder.set_position(cursor.state, depend);
        let top_offset = self.builder.int_ptr(offsets.top_offset);
        let top_cell = self.builder.ptr_add(glue, top_offset);
        let top_addr = self.builder.load(MachineType::ArchPtr, top_cell, GateType::Raw);
        let end_offset = self.builder.int_ptr(offsets.end_offset);
        let end_cell = self.builder.ptr_add(glue, end_offset);
        let end_addr = self.builder.load(MachineType::ArchPtr, end_cell, GateType::Raw);
        let top = self.builder.load(MachineType::ArchPtr, top_addr, GateType::TaggedPointer);
        let end = self.builder.load(MachineType::ArchPtr, end_addr, GateType::Raw);
        let new_top = self.builder.ptr_add(top, size);
        let exhausted = self.builder.icmp(CmpCondition::Ugt, new_top, end);
        let after_loads = self.builder.depend();
        let branch = self.branch(exhausted);

        // Fast path: bump the top pointer.
        self.open_arm(branch.if_false, after_loads);
        let bump = self.builder.store(top_addr, new_top);
        let fast = self.close_arm(branch.if_false);

        // Slow path: the runtime refills or collects.
        self.open_arm(branch.if_true, after_loads);
        let tagged_size = self.builder.tagged_int(size);
        let call = self.builder.call(stub, &[glue, tagged_size]);
        let slow = self.close_arm(branch.if_true);

        let merge = self.builder.merge(&[branch.if_false, branch.if_true]);
        let depend_selector = self.builder.depend_selector(merge, &[bump, call]);
        let mut merge_block = self.builder.take_emitted();
        self.become_value_selector(g, merge, &[top, call], depend_selector);
        merge_block.push(g);

        self.splice(
            cursor,
            cfg,
            Split {
                branch,
                arms: smallvec![fast, slow],
                merge_block,
            },
        );
        self.stats.inline_allocations += 1;
        debug!(gate = %g, ?region, "allocation lowered to inline fast path");
    }
}
