//! Target-independent code generation core
//!
//! Operands, variables and their liveness, anchors, instructions, register
//! allocation, the reservation protocol used while emitting code, and the
//! save intervals computed afterwards.

mod allocation;
mod anchor;
mod emit;
mod function;
mod instruction;
pub mod labels;
mod operand;
mod register;
mod reservation;
mod savings;
mod target;
mod variable;

#[cfg(test)]
pub(crate) mod testing;

pub use allocation::{allocate_greedy, allocate_local_slots};
pub use anchor::{Anchor, AnchorId};
pub use emit::{EmitContext, Location};
pub use function::{build_result_variables, Function, LocalSlot, Parameter};
pub use instruction::{
    Instruction, InstructionClass, InstructionKind, InstructionState, OperandRole, RegisterContent,
    RegisterContents,
};
pub use operand::Operand;
pub use register::{Register, RegisterCatalog, RegisterId};
pub use reservation::Reservation;
pub use savings::{fill_savings, save_regions, SaveRegion};
pub use target::Target;
pub use variable::{make_intersection, Address, LocalSlotId, Storage, Usage, UsageKind, Variable, VariableId};
