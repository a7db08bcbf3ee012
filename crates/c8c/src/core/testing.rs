//! A minimal accumulator machine for exercising the core in tests
//!
//! Registers: `a` (accumulator), `b`, `c`, `d` and the pair `bc`.
//! Byte parameter 0 arrives in `d`; results come back in `a` or `bc`.

use super::allocation;
use super::emit::{EmitContext, Location};
use super::function::Function;
use super::instruction::{InstructionClass, OperandRole};
use super::labels;
use super::operand::Operand;
use super::register::{Register, RegisterCatalog, RegisterId};
use super::target::Target;
use crate::ir::{Assign, BinOp, Binomial, Call, CmpOp, CompareJump, Jump, Monomial, Return, UnOp};
use crate::types::IrType;

pub const A: RegisterId = RegisterId(0);
pub const B: RegisterId = RegisterId(1);
pub const C: RegisterId = RegisterId(2);
pub const BC: RegisterId = RegisterId(3);
pub const D: RegisterId = RegisterId(4);

#[derive(Debug)]
pub struct ToyTarget {
    registers: RegisterCatalog,
}

impl ToyTarget {
    pub fn new() -> Self {
        Self {
            registers: RegisterCatalog::new(vec![
                Register::byte(0, "a"),
                Register::byte(1, "b"),
                Register::byte(2, "c"),
                Register::pair(3, "bc", 2, 1),
                Register::byte(4, "d"),
            ]),
        }
    }

    fn text(&self, cx: &EmitContext<'_>, operand: &Operand) -> String {
        match operand {
            Operand::Integer { value, .. } => format!("#{}", value),
            Operand::String { label, .. } => format!("#{}", label),
            Operand::Pointer { symbol, offset, .. } => format!("#{}+{}", symbol, offset),
            Operand::Variable { variable, offset, .. } => self.location_text(cx.variable_location(*variable, *offset)),
            Operand::Indirect { pointer, offset, .. } => {
                format!("[{}+{}]", self.location_text(cx.variable_location(*pointer, 0)), offset)
            }
            Operand::Register { register, .. } => self.registers.name(*register).to_string(),
        }
    }

    fn location_text(&self, location: Location) -> String {
        match location {
            Location::Register(register) => self.registers.name(register).to_string(),
            Location::Memory { label, offset: 0 } => label,
            Location::Memory { label, offset } => format!("{}+{}", label, offset),
            Location::Constant(value) => format!("#{}", value),
        }
    }

    fn load(&self, cx: &mut EmitContext<'_>, source: &Operand) {
        let text = self.text(cx, source);
        cx.emit(format!("ld a,{}", text));
        cx.add_changed(A);
        if let Operand::Variable { variable, offset, .. } = source {
            cx.set_variable(A, *variable, *offset);
        }
    }

    fn store(&self, cx: &mut EmitContext<'_>, destination: &Operand) {
        let text = self.text(cx, destination);
        cx.emit(format!("st a,{}", text));
        match destination {
            Operand::Variable { variable, offset, .. } => {
                if let Location::Register(register) = cx.variable_location(*variable, *offset) {
                    cx.add_changed(register);
                }
                cx.invalidate_variable(*variable);
                cx.set_variable(A, *variable, *offset);
            }
            Operand::Register { register, .. } => cx.add_changed(*register),
            _ => cx.invalidate_memory(),
        }
    }
}

impl Target for ToyTarget {
    fn name(&self) -> &'static str {
        "toy"
    }

    fn registers(&self) -> &RegisterCatalog {
        &self.registers
    }

    fn parameter_register(&self, index: usize, ty: &IrType) -> Option<RegisterId> {
        (index == 0 && ty.is_byte()).then_some(D)
    }

    fn return_register(&self, ty: &IrType) -> Option<RegisterId> {
        if ty.is_byte() { Some(A) } else { Some(BC) }
    }

    fn variable_registers(&self, ty: &IrType) -> Vec<RegisterId> {
        if ty.is_byte() { vec![B, C, D] } else { vec![BC] }
    }

    fn role_adaptability(&self, class: InstructionClass, role: OperandRole, _operand: &Operand, _register: RegisterId) -> Option<i32> {
        match (class, role) {
            (InstructionClass::Call, OperandRole::Destination) => None,
            _ => Some(1),
        }
    }

    fn bystander_adaptability(&self, class: InstructionClass, _wide: bool, _register: RegisterId) -> Option<i32> {
        match class {
            InstructionClass::Call => Some(-1),
            _ => Some(0),
        }
    }

    fn allocate_registers(&self, function: &mut Function) {
        allocation::allocate_greedy(function, self);
    }

    fn copy_candidates(&self, register: RegisterId) -> Vec<RegisterId> {
        if register == BC {
            return Vec::new();
        }
        [A, B, C, D].into_iter().filter(|&r| r != register).collect()
    }

    fn copy_register(&self, cx: &mut EmitContext<'_>, from: RegisterId, to: RegisterId) {
        cx.emit(format!("mov {},{}", self.registers.name(to), self.registers.name(from)));
    }

    fn save_unit(&self, register: RegisterId) -> RegisterId {
        if register == B || register == C { BC } else { register }
    }

    fn save_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        cx.emit(format!("st {},{}", self.registers.name(unit), slot));
    }

    fn restore_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        if cx.flags_live() {
            cx.emit("pushf");
        }
        cx.emit(format!("ld {},{}", self.registers.name(unit), slot));
        if cx.flags_live() {
            cx.emit("popf");
        }
    }

    fn region_save(&self, registers: &[RegisterId]) -> Vec<String> {
        registers.iter().map(|&r| format!("push {}", self.registers.name(self.save_unit(r)))).collect()
    }

    fn region_restore(&self, registers: &[RegisterId]) -> Vec<String> {
        registers.iter().rev().map(|&r| format!("pop {}", self.registers.name(self.save_unit(r)))).collect()
    }

    fn build_assign(&self, cx: &mut EmitContext<'_>, instruction: &Assign) {
        cx.with_register(A, Some(&instruction.source), |cx| {
            self.load(cx, &instruction.source);
            self.store(cx, &instruction.destination);
        });
    }

    fn build_binomial(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) {
        cx.with_register(A, Some(&instruction.left), |cx| {
            self.load(cx, &instruction.left);
            let mnemonic = match instruction.operator {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::And => "and",
                BinOp::Or => "or",
                BinOp::Xor => "xor",
                BinOp::Shl => "shl",
                BinOp::Shr => "shr",
            };
            let right = self.text(cx, &instruction.right);
            cx.emit(format!("{} a,{}", mnemonic, right));
            cx.add_changed(A);
            self.store(cx, &instruction.destination);
        });
    }

    fn build_monomial(&self, cx: &mut EmitContext<'_>, instruction: &Monomial) {
        cx.with_register(A, Some(&instruction.source), |cx| {
            self.load(cx, &instruction.source);
            cx.emit(match instruction.operator {
                UnOp::Neg => "neg a",
                UnOp::BitNot => "cpl a",
            });
            cx.add_changed(A);
            self.store(cx, &instruction.destination);
        });
    }

    fn build_compare_jump(&self, cx: &mut EmitContext<'_>, instruction: &CompareJump) {
        cx.with_register(A, Some(&instruction.left), |cx| {
            self.load(cx, &instruction.left);
            let right = self.text(cx, &instruction.right);
            cx.emit(format!("cmp a,{}", right));
            cx.set_flags_live(true);
        });
        cx.set_flags_live(false);
        let condition = match instruction.operator {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Ge => "ge",
        };
        let label = cx.anchor_label(instruction.anchor);
        cx.emit(format!("j{} {}", condition, label));
    }

    fn build_jump(&self, cx: &mut EmitContext<'_>, instruction: &Jump) {
        let label = cx.anchor_label(instruction.anchor);
        cx.emit(format!("jp {}", label));
    }

    fn build_call(&self, cx: &mut EmitContext<'_>, instruction: &Call) {
        let mut reservations = Vec::new();
        for (index, argument) in instruction.arguments.iter().enumerate() {
            match self.parameter_register(index, argument.ty()) {
                Some(register) => {
                    let reservation = cx.reserve(register, Some(argument));
                    let text = self.text(cx, argument);
                    cx.emit(format!("mov {},{}", self.registers.name(register), text));
                    cx.add_changed(register);
                    reservations.push(reservation);
                }
                None => cx.with_register(A, Some(argument), |cx| {
                    self.load(cx, argument);
                    cx.emit(format!("st a,{}", labels::parameter_label(&instruction.callee, index)));
                }),
            }
        }
        cx.emit(format!("call {}", instruction.callee));
        while let Some(reservation) = reservations.pop() {
            cx.discard(reservation);
        }
        cx.add_changed_all();
        if let Some(destination) = &instruction.destination {
            self.store(cx, destination);
        }
    }

    fn build_return(&self, cx: &mut EmitContext<'_>, instruction: &Return) {
        if let Some(value) = &instruction.value {
            cx.with_register(A, Some(value), |cx| self.load(cx, value));
        }
        let exit = cx.exit_label();
        cx.emit(format!("jp {}", exit));
    }

    fn code_segment(&self) -> Vec<String> {
        vec!["code".to_string()]
    }

    fn data_segment(&self) -> Vec<String> {
        vec!["data".to_string()]
    }

    fn public_symbol(&self, label: &str) -> String {
        format!("public {}", label)
    }

    fn extern_symbol(&self, label: &str) -> String {
        format!("extern {}", label)
    }

    fn return_code(&self) -> Vec<String> {
        vec!["ret".to_string()]
    }

    fn define_bytes(&self, label: &str, bytes: &[u8]) -> Vec<String> {
        let values: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
        vec![format!("{}: db {}", label, values.join(","))]
    }

    fn reserve_bytes(&self, label: &str, size: usize) -> Vec<String> {
        vec![format!("{}: ds {}", label, size)]
    }
}
