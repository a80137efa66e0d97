//! Field offsets the lowered code relies on.
//!
//! These must match the runtime's glue and generator object layouts. The
//! defaults describe the reference runtime; embedders with a different
//! layout pass their own [`RuntimeLayout`] through the lowering config.

use crate::ir::RegionFlag;

/// Tagged encoding of the language's `undefined` value.
pub const TAGGED_UNDEFINED: i64 = 0x02;

/// Glue offsets of one region's bump-pointer cells.
///
/// The glue holds the *addresses* of the top and end cells, not the cells
/// themselves, so the fast path loads twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOffsets {
    /// Offset of the pointer to the region's allocation top.
    pub top_offset: i64,
    /// Offset of the pointer to the region's allocation end.
    pub end_offset: i64,
}

impl RegionOffsets {
    pub const fn new(top_offset: i64, end_offset: i64) -> Self {
        RegionOffsets {
            top_offset,
            end_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub young: RegionOffsets,
    pub shared_old: RegionOffsets,
    pub shared_non_movable: RegionOffsets,

    /// Glue offset of the one-byte "concurrent marking active" flag.
    pub gc_state_offset: i64,

    /// Offset of the generator context inside the resume-context object.
    pub generator_context_offset: i64,

    /// Offset of the saved bytecode offset inside the generator context.
    pub generator_bc_offset_offset: i64,
}

impl RuntimeLayout {
    /// Bump-pointer cells for `region`. Old space has none.
    pub const fn region(&self, region: RegionFlag) -> Option<RegionOffsets> {
        match region {
            RegionFlag::Young => Some(self.young),
            RegionFlag::SharedOld => Some(self.shared_old),
            RegionFlag::SharedNonMovable => Some(self.shared_non_movable),
            RegionFlag::Old => None,
        }
    }
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        RuntimeLayout {
            young: RegionOffsets::new(0x40, 0x48),
            shared_old: RegionOffsets::new(0x50, 0x58),
            shared_non_movable: RegionOffsets::new(0x60, 0x68),
            gc_state_offset: 0x10,
            generator_context_offset: 0x18,
            generator_bc_offset_offset: 0x2c,
        }
    }
}
