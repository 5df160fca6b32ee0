//! SSA intermediate representation, dominator-based analyses, the optimization
//! pipeline, and the SelectionDAG-based RISC-V64 backend.

pub mod analysis;
pub mod dag;
pub mod ir;
pub mod isel;
pub mod lowering;
pub mod mir;
pub mod pass;
pub mod pipeline;
pub mod regalloc;
pub mod target;
pub mod verify;

pub use ir::*;
