//! Intermediate Representation module
//!
//! Concrete instruction kinds, the module container and the builders
//! front ends use to emit a function's linear instruction stream.

mod inst;
mod builder;
mod module;

pub use inst::*;
pub use builder::{FunctionBuilder, ModuleBuilder, Relation, Signature};
pub use module::{IrExtern, IrGlobal, IrModule, IrString};
