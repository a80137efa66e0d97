//! Runtime interface of lowered code: callable stubs and object layouts.

pub mod layout;
pub mod stubs;

pub use layout::{RegionOffsets, RuntimeLayout, TAGGED_UNDEFINED};
pub use stubs::RuntimeStub;
