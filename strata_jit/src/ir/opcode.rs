//! Gate opcodes.
//!
//! The opcode set is a closed sum type. Each variant carries exactly the
//! payload its lowering needs, and [`OpCode::arity`] fixes how many state,
//! depend and value inputs a gate of that opcode has. Variable-arity
//! opcodes (merges, loop headers, selectors, calls) carry their count in
//! the payload so the arity always follows from the opcode alone.
//!
//! Only the subset needed by the resume and memory lowering passes is
//! modelled here.

use std::fmt;

use crate::runtime::RuntimeStub;

// =============================================================================
// Edge Kinds and Arity
// =============================================================================

/// The three independently ordered edge lists of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Control-flow predecessor.
    State,
    /// Effect-ordering predecessor.
    Depend,
    /// Data operand.
    Value,
}

impl EdgeKind {
    pub const fn name(self) -> &'static str {
        match self {
            EdgeKind::State => "state",
            EdgeKind::Depend => "depend",
            EdgeKind::Value => "value",
        }
    }
}

/// Input counts per edge kind. Inputs are stored state first, then
/// depend, then value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub state: usize,
    pub depend: usize,
    pub value: usize,
}

impl Arity {
    pub const fn new(state: usize, depend: usize, value: usize) -> Self {
        Arity {
            state,
            depend,
            value,
        }
    }

    #[inline]
    pub const fn total(self) -> usize {
        self.state + self.depend + self.value
    }

    #[inline]
    pub const fn count(self, kind: EdgeKind) -> usize {
        match kind {
            EdgeKind::State => self.state,
            EdgeKind::Depend => self.depend,
            EdgeKind::Value => self.value,
        }
    }

    /// Offset of the first input of `kind` in the flat input list.
    #[inline]
    pub const fn start(self, kind: EdgeKind) -> usize {
        match kind {
            EdgeKind::State => 0,
            EdgeKind::Depend => self.state,
            EdgeKind::Value => self.state + self.depend,
        }
    }

    /// Classify a flat input position.
    pub const fn kind_at(self, position: usize) -> (EdgeKind, usize) {
        if position < self.state {
            (EdgeKind::State, position)
        } else if position < self.state + self.depend {
            (EdgeKind::Depend, position - self.state)
        } else {
            (EdgeKind::Value, position - self.state - self.depend)
        }
    }
}

// =============================================================================
// Memory Attributes
// =============================================================================

/// Heap region targeted by an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionFlag {
    Young,
    Old,
    SharedOld,
    SharedNonMovable,
}

impl RegionFlag {
    pub const ALL: [RegionFlag; 4] = [
        RegionFlag::Young,
        RegionFlag::Old,
        RegionFlag::SharedOld,
        RegionFlag::SharedNonMovable,
    ];

    /// Old-space allocation is never inlined.
    #[inline]
    pub const fn has_inline_fast_path(self) -> bool {
        !matches!(self, RegionFlag::Old)
    }
}

/// Compile-time barrier classification of a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    NoBarrier,
    NeedsBarrier,
    /// The compiler could not prove whether the value is a heap pointer.
    Unknown,
}

/// Whether the accessed object lives in the shared heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareKind {
    Shared,
    NonShared,
    Unknown,
}

/// Barrier requirements attached to an abstract load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAttribute {
    pub barrier: Barrier,
    pub share: ShareKind,
}

impl MemoryAttribute {
    pub const fn new(barrier: Barrier, share: ShareKind) -> Self {
        MemoryAttribute { barrier, share }
    }

    pub const fn no_barrier() -> Self {
        Self::new(Barrier::NoBarrier, ShareKind::Unknown)
    }

    pub const fn needs_barrier() -> Self {
        Self::new(Barrier::NeedsBarrier, ShareKind::Unknown)
    }

    pub const fn unknown_barrier() -> Self {
        Self::new(Barrier::Unknown, ShareKind::Unknown)
    }

    pub const fn with_share(self, share: ShareKind) -> Self {
        Self::new(self.barrier, share)
    }
}

// =============================================================================
// Comparisons
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpCondition {
    Eq,
    Ne,
    /// Unsigned greater-than.
    Ugt,
    /// Signed less-than.
    Slt,
}

// =============================================================================
// OpCode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // Roots
    /// Control root: "before anything happened".
    StateEntry,
    /// Effect root.
    DependEntry,
    /// Function argument by index.
    Argument(u16),
    /// Constant bits, interpreted through the gate's machine type.
    Constant(i64),

    // Control
    IfBranch,
    IfTrue,
    IfFalse,
    /// Normal-completion projection of a throwing operation.
    IfSuccess,
    Merge(u16),
    /// Loop header. Input 0 is the loop entry, the rest are back edges.
    LoopBegin(u16),
    LoopBack,
    Return,
    /// Implicit safepoint/stack check the translator may insert at entry.
    CheckSafepoint,

    // Selectors and relays
    ValueSelector(u16),
    DependSelector(u16),
    DependRelay,
    StateSplit,

    // Pure arithmetic
    Add,
    PtrAdd,
    Icmp(CmpCondition),
    Trunc,
    ZExt,
    FExt,
    /// Box a raw integer as a tagged int.
    TaggedInt,
    /// Runtime check "tagged value is a heap object".
    IsHeapObject,

    // Concrete memory
    RawLoad,
    RawStore,
    Call { stub: RuntimeStub, argc: u16 },

    // Generators
    /// Saves state and suspends; value input is the resume bytecode offset.
    Suspend,
    /// Resume point; value input is the generator object.
    Resume,

    // Abstract memory, eliminated by the memory lowering pass
    /// Inputs: depend, glue, size.
    HeapAlloc(RegionFlag),
    /// Inputs: depend, glue, base, offset.
    Load(MemoryAttribute),
    /// Inputs: depend, glue, base, offset, value.
    Store(MemoryAttribute),
}

impl OpCode {
    /// Declared input counts for this opcode.
    pub const fn arity(self) -> Arity {
        match self {
            OpCode::StateEntry | OpCode::DependEntry | OpCode::Argument(_) | OpCode::Constant(_) => {
                Arity::new(0, 0, 0)
            }
            OpCode::IfBranch => Arity::new(1, 0, 1),
            OpCode::IfTrue | OpCode::IfFalse | OpCode::IfSuccess | OpCode::LoopBack => {
                Arity::new(1, 0, 0)
            }
            OpCode::Merge(n) | OpCode::LoopBegin(n) => Arity::new(n as usize, 0, 0),
            OpCode::Return => Arity::new(1, 1, 1),
            OpCode::CheckSafepoint | OpCode::DependRelay | OpCode::StateSplit => Arity::new(1, 1, 0),
            OpCode::ValueSelector(n) => Arity::new(1, 0, n as usize),
            OpCode::DependSelector(n) => Arity::new(1, n as usize, 0),
            OpCode::Add | OpCode::PtrAdd | OpCode::Icmp(_) => Arity::new(0, 0, 2),
            OpCode::Trunc
            | OpCode::ZExt
            | OpCode::FExt
            | OpCode::TaggedInt
            | OpCode::IsHeapObject => Arity::new(0, 0, 1),
            OpCode::RawLoad => Arity::new(0, 1, 1),
            OpCode::RawStore => Arity::new(0, 1, 2),
            OpCode::Call { argc, .. } => Arity::new(0, 1, argc as usize),
            OpCode::Suspend | OpCode::Resume => Arity::new(1, 1, 1),
            OpCode::HeapAlloc(_) => Arity::new(0, 1, 2),
            OpCode::Load(_) => Arity::new(0, 1, 3),
            OpCode::Store(_) => Arity::new(0, 1, 4),
        }
    }

    /// The same opcode with one more input of `kind`, for variable-arity
    /// opcodes. `None` when the opcode cannot grow that edge list.
    pub const fn grown(self, kind: EdgeKind) -> Option<OpCode> {
        match (self, kind) {
            (OpCode::Merge(n), EdgeKind::State) => Some(OpCode::Merge(n + 1)),
            (OpCode::LoopBegin(n), EdgeKind::State) => Some(OpCode::LoopBegin(n + 1)),
            (OpCode::ValueSelector(n), EdgeKind::Value) => Some(OpCode::ValueSelector(n + 1)),
            (OpCode::DependSelector(n), EdgeKind::Depend) => Some(OpCode::DependSelector(n + 1)),
            _ => None,
        }
    }

    /// Gates that may start a basic block.
    pub const fn is_block_head(self) -> bool {
        matches!(
            self,
            OpCode::StateEntry
                | OpCode::IfTrue
                | OpCode::IfFalse
                | OpCode::IfSuccess
                | OpCode::Merge(_)
                | OpCode::LoopBegin(_)
        )
    }

    /// Gates consumed through state edges by other gates.
    pub const fn produces_state(self) -> bool {
        matches!(
            self,
            OpCode::StateEntry
                | OpCode::IfBranch
                | OpCode::IfTrue
                | OpCode::IfFalse
                | OpCode::IfSuccess
                | OpCode::Merge(_)
                | OpCode::LoopBegin(_)
                | OpCode::LoopBack
                | OpCode::CheckSafepoint
                | OpCode::Suspend
                | OpCode::Resume
        )
    }

    /// Selectors bind to a merge or loop header through state input 0.
    #[inline]
    pub const fn is_selector(self) -> bool {
        matches!(self, OpCode::ValueSelector(_) | OpCode::DependSelector(_))
    }

    /// Allocation and barrier-classified memory gates.
    #[inline]
    pub const fn is_abstract_memory(self) -> bool {
        matches!(
            self,
            OpCode::HeapAlloc(_) | OpCode::Load(_) | OpCode::Store(_)
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Argument(i) => write!(f, "Argument({i})"),
            OpCode::Constant(v) => write!(f, "Constant({v})"),
            OpCode::Merge(n) => write!(f, "Merge({n})"),
            OpCode::LoopBegin(n) => write!(f, "LoopBegin({n})"),
            OpCode::ValueSelector(n) => write!(f, "ValueSelector({n})"),
            OpCode::DependSelector(n) => write!(f, "DependSelector({n})"),
            OpCode::Icmp(cc) => write!(f, "Icmp({cc:?})"),
            OpCode::Call { stub, argc } => write!(f, "Call({}, {argc})", stub.name()),
            OpCode::HeapAlloc(region) => write!(f, "HeapAlloc({region:?})"),
            OpCode::Load(attr) => write!(f, "Load({:?}, {:?})", attr.barrier, attr.share),
            OpCode::Store(attr) => write!(f, "Store({:?}, {:?})", attr.barrier, attr.share),
            other => write!(f, "{other:?}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
