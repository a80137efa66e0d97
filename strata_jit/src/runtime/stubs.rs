//! Runtime stubs reachable from lowered code.
//!
//! Every stub follows one calling convention: the glue pointer (the
//! per-thread runtime context) is argument 0, the operation's own
//! arguments follow, and the stub produces one result.

use crate::ir::{MachineType, RegionFlag, ShareKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeStub {
    AllocateInYoung,
    AllocateInOld,
    AllocateInSharedOld,
    AllocateInSharedNonMovable,
    /// Write barrier for an object whose heap is not known statically.
    WriteBarrier,
    /// Write barrier for an object known to be thread-local.
    WriteBarrierLocal,
    /// Write barrier for an object known to live in the shared heap.
    WriteBarrierShared,
    /// Load through the concurrent-marking read barrier.
    ReadBarrier,
}

impl RuntimeStub {
    /// Slow-path allocator for `region`.
    pub const fn allocator(region: RegionFlag) -> Self {
        match region {
            RegionFlag::Young => RuntimeStub::AllocateInYoung,
            RegionFlag::Old => RuntimeStub::AllocateInOld,
            RegionFlag::SharedOld => RuntimeStub::AllocateInSharedOld,
            RegionFlag::SharedNonMovable => RuntimeStub::AllocateInSharedNonMovable,
        }
    }

    /// Write barrier matching what is known about the target object.
    pub const fn write_barrier(share: ShareKind) -> Self {
        match share {
            ShareKind::Shared => RuntimeStub::WriteBarrierShared,
            ShareKind::NonShared => RuntimeStub::WriteBarrierLocal,
            ShareKind::Unknown => RuntimeStub::WriteBarrier,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RuntimeStub::AllocateInYoung => "AllocateInYoung",
            RuntimeStub::AllocateInOld => "AllocateInOld",
            RuntimeStub::AllocateInSharedOld => "AllocateInSharedOld",
            RuntimeStub::AllocateInSharedNonMovable => "AllocateInSharedNonMovable",
            RuntimeStub::WriteBarrier => "WriteBarrier",
            RuntimeStub::WriteBarrierLocal => "WriteBarrierLocal",
            RuntimeStub::WriteBarrierShared => "WriteBarrierShared",
            RuntimeStub::ReadBarrier => "ReadBarrier",
        }
    }

    /// Argument count including the glue pointer.
    pub const fn argc(self) -> u16 {
        match self {
            RuntimeStub::AllocateInYoung
            | RuntimeStub::AllocateInOld
            | RuntimeStub::AllocateInSharedOld
            | RuntimeStub::AllocateInSharedNonMovable => 2,
            // glue, object, offset, value
            RuntimeStub::WriteBarrier
            | RuntimeStub::WriteBarrierLocal
            | RuntimeStub::WriteBarrierShared => 4,
            // glue, object, offset
            RuntimeStub::ReadBarrier => 3,
        }
    }

    pub const fn return_type(self) -> MachineType {
        match self {
            RuntimeStub::WriteBarrier
            | RuntimeStub::WriteBarrierLocal
            | RuntimeStub::WriteBarrierShared => MachineType::NoValue,
            _ => MachineType::I64,
        }
    }

    #[inline]
    pub const fn is_write_barrier(self) -> bool {
        matches!(
            self,
            RuntimeStub::WriteBarrier | RuntimeStub::WriteBarrierLocal | RuntimeStub::WriteBarrierShared
        )
    }

    #[inline]
    pub const fn is_allocator(self) -> bool {
        matches!(
            self,
            RuntimeStub::AllocateInYoung
                | RuntimeStub::AllocateInOld
                | RuntimeStub::AllocateInSharedOld
                | RuntimeStub::AllocateInSharedNonMovable
        )
    }
}
