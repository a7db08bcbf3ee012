//! Unified type system for the IR
//!
//! Language-agnostic types used in the intermediate representation,
//! sized for 8-bit CPUs.

mod ir_type;

pub use ir_type::{IrType, IrTypeKind};
