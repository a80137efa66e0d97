//! Gate-based intermediate representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed indices and side tables
//! - **Types** (`types.rs`): machine and semantic value types
//! - **Opcodes** (`opcode.rs`): the closed operation set and its arities
//! - **Gate** (`gate.rs`): one operation with state, depend and value inputs
//! - **Circuit** (`circuit.rs`): gate storage, use lists, edge relinking
//! - **Builder** (`builder.rs`): positioned gate construction for passes
//! - **CFG** (`cfg.rs`): the scheduled basic-block linearization

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod circuit;
pub mod gate;
pub mod opcode;
pub mod types;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::CircuitBuilder;
pub use cfg::{BasicBlock, BlockId, ControlFlowGraph};
pub use circuit::{Circuit, UseEdge};
pub use gate::{Gate, GateInputs, GateRef};
pub use opcode::{
    Arity, Barrier, CmpCondition, EdgeKind, MemoryAttribute, OpCode, RegionFlag, ShareKind,
};
pub use types::{GateType, MachineType};
