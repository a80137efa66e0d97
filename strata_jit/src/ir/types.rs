//! Physical and semantic value types of gates.
//!
//! The machine type says how a value is represented in registers and is
//! what lowering passes reason about. The gate type is the semantic tag
//! attached by the translator and type lowering; it is carried through
//! untouched except where a pass synthesizes a new value.

use std::fmt;

// =============================================================================
// Machine Type
// =============================================================================

/// Physical representation of a gate's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    /// The gate produces no value (control, effects, stores).
    NoValue,
    /// Boolean produced by comparisons.
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Pointer-width integer.
    ArchPtr,
}

impl MachineType {
    /// Width in bits; `None` for [`MachineType::NoValue`].
    pub const fn bits(self) -> Option<u32> {
        match self {
            MachineType::NoValue => None,
            MachineType::I1 => Some(1),
            MachineType::I8 => Some(8),
            MachineType::I16 => Some(16),
            MachineType::I32 | MachineType::F32 => Some(32),
            MachineType::I64 | MachineType::F64 | MachineType::ArchPtr => Some(64),
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, MachineType::F32 | MachineType::F64)
    }

    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(
            self,
            MachineType::I1
                | MachineType::I8
                | MachineType::I16
                | MachineType::I32
                | MachineType::I64
                | MachineType::ArchPtr
        )
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineType::NoValue => "novalue",
            MachineType::I1 => "i1",
            MachineType::I8 => "i8",
            MachineType::I16 => "i16",
            MachineType::I32 => "i32",
            MachineType::I64 => "i64",
            MachineType::F32 => "f32",
            MachineType::F64 => "f64",
            MachineType::ArchPtr => "ptr",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Gate Type
// =============================================================================

/// Semantic tag of a gate's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GateType {
    /// No semantic value (control and effect gates).
    #[default]
    Empty,
    /// Any tagged language value.
    AnyTagged,
    /// Tagged value known to be a heap pointer.
    TaggedPointer,
    /// Tagged value known not to be a heap pointer (ints, doubles, specials).
    TaggedNonPointer,
    /// Raw machine value with no tagging (offsets, addresses, flags).
    Raw,
}

impl GateType {
    /// Whether a value of this type may reference the heap.
    #[inline]
    pub const fn may_be_heap_object(self) -> bool {
        matches!(self, GateType::AnyTagged | GateType::TaggedPointer)
    }
}
