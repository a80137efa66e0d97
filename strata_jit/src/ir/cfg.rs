//! Basic-block linearization of a scheduled circuit.
//!
//! The scheduler places every non-floating gate into exactly one block and
//! orders the blocks. The memory lowering pass reads this structure and
//! splices new blocks into it; emission consumes the result.
//!
//! Blocks carry no edges of their own: control flow between blocks is
//! still the state edges of the circuit. A block starts with the state
//! gate that opens it (entry, projection, merge or loop header).

use rustc_hash::FxHashSet;
use strata_core::CompileError;

use super::arena::Id;
use super::circuit::Circuit;
use super::gate::GateRef;

// =============================================================================
// Basic Block
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicBlock {
    gates: Vec<GateRef>,
}

/// Block identifier: the block's position in the graph.
pub type BlockId = Id<BasicBlock>;

impl BasicBlock {
    pub fn new(gates: Vec<GateRef>) -> Self {
        BasicBlock { gates }
    }

    /// The state gate that opens this block.
    #[inline]
    pub fn head(&self) -> Option<GateRef> {
        self.gates.first().copied()
    }

    #[inline]
    pub fn gates(&self) -> &[GateRef] {
        &self.gates
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    #[inline]
    pub fn push(&mut self, g: GateRef) {
        self.gates.push(g);
    }

    pub fn contains(&self, g: GateRef) -> bool {
        self.gates.contains(&g)
    }

    pub fn into_gates(self) -> Vec<GateRef> {
        self.gates
    }
}

impl From<Vec<GateRef>> for BasicBlock {
    fn from(gates: Vec<GateRef>) -> Self {
        BasicBlock::new(gates)
    }
}

// =============================================================================
// Control Flow Graph
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph { blocks: Vec::new() }
    }

    pub fn from_blocks<B: Into<BasicBlock>>(blocks: impl IntoIterator<Item = B>) -> Self {
        ControlFlowGraph {
            blocks: blocks.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a block at the end.
    pub fn push_block(&mut self, block: impl Into<BasicBlock>) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(block.into());
        id
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.as_usize()]
    }

    #[inline]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId::new(i as u32), b))
    }

    /// Move all blocks out, leaving the graph empty. Passes that rebuild
    /// the block list take the old blocks, then push the new ones.
    pub fn take_blocks(&mut self) -> Vec<BasicBlock> {
        std::mem::take(&mut self.blocks)
    }

    /// Block and index of `g`, if placed.
    pub fn position_of(&self, g: GateRef) -> Option<(BlockId, usize)> {
        self.iter().find_map(|(id, block)| {
            block
                .gates
                .iter()
                .position(|&x| x == g)
                .map(|i| (id, i))
        })
    }

    /// Total number of placed gates.
    pub fn gate_count(&self) -> usize {
        self.blocks.iter().map(BasicBlock::len).sum()
    }

    pub fn placed_gates(&self) -> impl Iterator<Item = GateRef> + '_ {
        self.blocks.iter().flat_map(|b| b.gates.iter().copied())
    }

    /// Check that every placed gate appears once and every block opens
    /// with a state gate.
    pub fn verify(&self, circuit: &Circuit) -> strata_core::Result<()> {
        let mut seen = FxHashSet::default();
        for (id, block) in self.iter() {
            let Some(head) = block.head() else {
                return Err(CompileError::EmptyBlock { block: id.index() });
            };
            if !circuit.op(head).is_block_head() {
                return Err(CompileError::BadBlockHead {
                    block: id.index(),
                    gate: head.index(),
                });
            }
            for &g in block.gates() {
                if !seen.insert(g) {
                    return Err(CompileError::DuplicatePlacement { gate: g.index() });
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
