//! Target capability interface
//!
//! Everything the core needs to know about a CPU family: its registers,
//! calling convention, allocation preferences, how to move registers
//! around for reservations, the code bodies of each instruction kind and
//! the syntax of the assembly file.

use std::fmt::Debug;

use super::emit::EmitContext;
use super::function::Function;
use super::instruction::{InstructionClass, OperandRole};
use super::operand::Operand;
use super::register::{RegisterCatalog, RegisterId};
use crate::ir::{Assign, Binomial, Call, CompareJump, Jump, Monomial, Return};
use crate::types::IrType;

pub trait Target: Debug {
    /// Short name used on the command line
    fn name(&self) -> &'static str;

    fn registers(&self) -> &RegisterCatalog;

    // ==================== Calling convention ====================

    /// Register carrying parameter `index`, `None` when it goes through memory
    fn parameter_register(&self, index: usize, ty: &IrType) -> Option<RegisterId>;

    /// Register carrying a return value, `None` when it goes through memory
    fn return_register(&self, ty: &IrType) -> Option<RegisterId>;

    // ==================== Allocation ====================

    /// Registers a variable of type `ty` may live in, in order of preference
    fn variable_registers(&self, ty: &IrType) -> Vec<RegisterId>;

    /// Score of `register` for an operand playing `role` in an instruction
    /// of `class`; `None` vetoes the register
    fn role_adaptability(
        &self,
        class: InstructionClass,
        role: OperandRole,
        operand: &Operand,
        register: RegisterId,
    ) -> Option<i32>;

    /// Score of `register` for a variable living through an instruction
    /// that does not mention it. `wide` is set when the instruction works
    /// on words.
    fn bystander_adaptability(&self, class: InstructionClass, wide: bool, register: RegisterId) -> Option<i32>;

    /// Assign registers to the function's variables
    fn allocate_registers(&self, function: &mut Function);

    // ==================== Relocation ====================

    /// Registers `register` can be copied into and back from
    fn copy_candidates(&self, register: RegisterId) -> Vec<RegisterId>;

    fn copy_register(&self, cx: &mut EmitContext<'_>, from: RegisterId, to: RegisterId);

    /// The register saved and restored as a unit when `register` is
    fn save_unit(&self, register: RegisterId) -> RegisterId {
        register
    }

    /// Byte offset of `register` within a saved `unit`
    fn saved_offset(&self, unit: RegisterId, register: RegisterId) -> usize {
        self.registers()
            .get(unit)
            .parts
            .iter()
            .position(|&part| part == register)
            .unwrap_or(0)
    }

    fn save_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str);

    fn restore_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str);

    // ==================== Save regions ====================

    /// Code preserving `registers` around a run of instructions
    fn region_save(&self, registers: &[RegisterId]) -> Vec<String>;

    fn region_restore(&self, registers: &[RegisterId]) -> Vec<String>;

    // ==================== Instruction bodies ====================

    fn build_assign(&self, cx: &mut EmitContext<'_>, instruction: &Assign);
    fn build_binomial(&self, cx: &mut EmitContext<'_>, instruction: &Binomial);
    fn build_monomial(&self, cx: &mut EmitContext<'_>, instruction: &Monomial);
    fn build_compare_jump(&self, cx: &mut EmitContext<'_>, instruction: &CompareJump);
    fn build_jump(&self, cx: &mut EmitContext<'_>, instruction: &Jump);
    fn build_call(&self, cx: &mut EmitContext<'_>, instruction: &Call);
    fn build_return(&self, cx: &mut EmitContext<'_>, instruction: &Return);

    // ==================== Assembly file ====================

    fn comment(&self, text: &str) -> String {
        format!("; {}", text)
    }

    fn code_segment(&self) -> Vec<String>;
    fn data_segment(&self) -> Vec<String>;
    fn public_symbol(&self, label: &str) -> String;
    fn extern_symbol(&self, label: &str) -> String;

    fn label(&self, label: &str) -> String {
        format!("{}:", label)
    }

    /// Code leaving a function from its exit label
    fn return_code(&self) -> Vec<String>;

    fn define_bytes(&self, label: &str, bytes: &[u8]) -> Vec<String>;
    fn reserve_bytes(&self, label: &str, size: usize) -> Vec<String>;

    /// Scratch memory the target's code relies on, as (label, size)
    fn runtime_data(&self) -> Vec<(String, usize)> {
        Vec::new()
    }

    /// Segment the runtime data goes into, when it differs from the data
    /// segment
    fn runtime_segment(&self) -> Vec<String> {
        Vec::new()
    }
}
