//! Z80 code emitter
//!
//! Byte arithmetic runs in A and word arithmetic in HL with DE as the
//! second operand. Memory behind a pointer is reached through HL, or as
//! `(ix+d)` when the pointer lives in an index register.

use super::registers::*;
use crate::core::{
    allocate_greedy, labels, EmitContext, Function, InstructionClass, Location, Operand, OperandRole,
    RegisterCatalog, RegisterContent, RegisterId, Target, VariableId,
};
use crate::ir::{Assign, BinOp, Binomial, Call, CmpOp, CompareJump, Jump, Monomial, Return, UnOp};
use crate::types::IrType;

/// How an 8-bit instruction or a 16-bit load can reach a value
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Immediate(String),
    Register(RegisterId),
    /// Absolute address
    Memory(String),
    Indirect { pointer: VariableId, offset: usize },
}

fn address(label: &str, offset: i64) -> String {
    match offset {
        0 => label.to_string(),
        o if o > 0 => format!("{}+{}", label, o),
        o => format!("{}{}", label, o),
    }
}

fn lane_of(value: i64, lane: usize) -> i64 {
    (value >> (8 * lane)) & 0xff
}

fn half(expression: &str, lane: usize) -> String {
    if lane == 0 {
        format!("low({})", expression)
    } else {
        format!("high({})", expression)
    }
}

#[derive(Debug)]
pub struct Z80Target {
    registers: RegisterCatalog,
}

impl Z80Target {
    pub fn new() -> Self {
        Self { registers: catalog() }
    }

    fn name_of(&self, register: RegisterId) -> &'static str {
        self.registers.name(register)
    }

    /// (low, high) halves of a pair
    fn halves(&self, pair: RegisterId) -> (RegisterId, RegisterId) {
        let parts = &self.registers.get(pair).parts;
        (parts[0], parts[1])
    }

    // ==================== Operand access ====================

    fn byte_source(&self, cx: &EmitContext<'_>, operand: &Operand, lane: usize) -> Source {
        match operand {
            Operand::Integer { value, .. } => Source::Immediate(lane_of(*value, lane).to_string()),
            Operand::String { label, .. } => Source::Immediate(half(label, lane)),
            Operand::Pointer { symbol, offset, .. } => Source::Immediate(half(&address(symbol, *offset), lane)),
            Operand::Variable { variable, offset, .. } => match cx.variable_location(*variable, offset + lane) {
                Location::Register(register) => Source::Register(register),
                Location::Memory { label, offset } => Source::Memory(address(&label, offset as i64)),
                Location::Constant(value) => Source::Immediate((value & 0xff).to_string()),
            },
            Operand::Indirect { pointer, offset, .. } => Source::Indirect { pointer: *pointer, offset: offset + lane },
            Operand::Register { register, .. } => match self.registers.byte_part(*register, lane) {
                Some(part) => Source::Register(part),
                None => panic!("byte {} of {} is not addressable", lane, self.name_of(*register)),
            },
        }
    }

    fn word_source(&self, cx: &EmitContext<'_>, operand: &Operand) -> Source {
        match operand {
            Operand::Integer { value, .. } => Source::Immediate((value & 0xffff).to_string()),
            Operand::String { label, .. } => Source::Immediate(label.clone()),
            Operand::Pointer { symbol, offset, .. } => Source::Immediate(address(symbol, *offset)),
            Operand::Variable { variable, offset, .. } => match cx.variable_location(*variable, *offset) {
                Location::Register(register) => Source::Register(register),
                Location::Memory { label, offset } => Source::Memory(address(&label, offset as i64)),
                Location::Constant(value) => Source::Immediate((value & 0xffff).to_string()),
            },
            Operand::Indirect { pointer, offset, .. } => Source::Indirect { pointer: *pointer, offset: *offset },
            Operand::Register { register, .. } => Source::Register(*register),
        }
    }

    /// Whether `register` already holds byte `lane` of `operand`, or all of
    /// it when `register` is a word register
    fn holds(&self, cx: &EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) -> bool {
        let wide = self.registers.width(register) == 2;
        match operand {
            Operand::Integer { value, .. } => {
                let value = if wide { value & 0xffff } else { lane_of(*value, lane) };
                cx.is_constant_assigned(register, value)
            }
            Operand::String { label, .. } if wide => {
                cx.content(register) == Some(&RegisterContent::Symbol { label: label.clone(), offset: 0 })
            }
            Operand::Pointer { symbol, offset, .. } if wide => {
                cx.content(register) == Some(&RegisterContent::Symbol { label: symbol.clone(), offset: *offset })
            }
            Operand::Variable { variable, offset, .. } => cx.is_variable_assigned(register, *variable, offset + lane),
            _ => false,
        }
    }

    fn remember(&self, cx: &mut EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) {
        let wide = self.registers.width(register) == 2;
        match operand {
            Operand::Integer { value, .. } => {
                let value = if wide { value & 0xffff } else { lane_of(*value, lane) };
                cx.set_constant(register, value);
            }
            Operand::String { label, .. } if wide => cx.set_symbol(register, label.clone(), 0),
            Operand::Pointer { symbol, offset, .. } if wide => cx.set_symbol(register, symbol.clone(), *offset),
            Operand::Variable { variable, offset, .. } => cx.set_variable(register, *variable, offset + lane),
            _ => {}
        }
    }

    /// The register a variable destination lives in right now
    fn destination_register(&self, cx: &EmitContext<'_>, destination: &Operand) -> Option<RegisterId> {
        match destination {
            Operand::Variable { variable, offset, .. } => match cx.variable_location(*variable, *offset) {
                Location::Register(register) => Some(register),
                _ => None,
            },
            _ => None,
        }
    }

    /// Run `body` with the text addressing the byte at `pointer + offset`.
    /// With `exclusive` set the body may modify HL.
    fn with_pointer(
        &self,
        cx: &mut EmitContext<'_>,
        pointer: VariableId,
        offset: usize,
        exclusive: bool,
        body: impl FnOnce(&mut EmitContext<'_>, &str),
    ) {
        match cx.variable_location(pointer, 0) {
            Location::Register(index) if is_index(index) && offset < 127 => {
                body(cx, &format!("({}+{})", self.name_of(index), offset));
                return;
            }
            Location::Register(HL) if offset == 0 && !exclusive => {
                body(cx, "(hl)");
                return;
            }
            _ => {}
        }
        let operand = Operand::variable(cx.variable(pointer).ty().clone(), pointer);
        cx.with_register(HL, Some(&operand), |cx| {
            self.load_word(cx, HL, &operand);
            self.advance_hl(cx, offset);
            body(cx, "(hl)");
        });
    }

    fn advance_hl(&self, cx: &mut EmitContext<'_>, offset: usize) {
        match offset {
            0 => return,
            1..=4 => {
                for _ in 0..offset {
                    cx.emit("inc hl");
                }
            }
            _ => {
                cx.emit("push de");
                cx.emit(format!("ld de,{}", offset));
                cx.emit("add hl,de");
                cx.emit("pop de");
            }
        }
        cx.add_changed(HL);
    }

    // ==================== Byte moves ====================

    fn load_a(&self, cx: &mut EmitContext<'_>, operand: &Operand, lane: usize) {
        if self.holds(cx, A, operand, lane) {
            return;
        }
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(value) => cx.emit(format!("ld a,{}", value)),
            Source::Register(A) => {}
            Source::Register(register) => cx.emit(format!("ld a,{}", self.name_of(register))),
            Source::Memory(at) => cx.emit(format!("ld a,({})", at)),
            Source::Indirect { pointer, offset } => {
                self.with_pointer(cx, pointer, offset, false, |cx, at| cx.emit(format!("ld a,{}", at)));
            }
        }
        cx.add_changed(A);
        self.remember(cx, A, operand, lane);
    }

    /// Load byte `lane` of `operand` into any byte register
    fn load_byte(&self, cx: &mut EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) {
        if register == A {
            self.load_a(cx, operand, lane);
            return;
        }
        if self.holds(cx, register, operand, lane) {
            return;
        }
        let name = self.name_of(register);
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(value) => cx.emit(format!("ld {},{}", name, value)),
            Source::Register(source) if source == register => return,
            Source::Register(source) => cx.emit(format!("ld {},{}", name, self.name_of(source))),
            // only the accumulator loads from an absolute address
            Source::Memory(_) | Source::Indirect { .. } => cx.with_register(A, Some(operand), |cx| {
                self.load_a(cx, operand, lane);
                cx.emit(format!("ld {},a", name));
            }),
        }
        cx.add_changed(register);
        self.remember(cx, register, operand, lane);
    }

    fn store_a(&self, cx: &mut EmitContext<'_>, destination: &Operand, lane: usize) {
        match destination {
            Operand::Variable { variable, offset, .. } => {
                match cx.variable_location(*variable, offset + lane) {
                    Location::Register(A) => {}
                    Location::Register(register) => {
                        cx.emit(format!("ld {},a", self.name_of(register)));
                        cx.add_changed(register);
                    }
                    Location::Memory { label, offset } => cx.emit(format!("ld ({}),a", address(&label, offset as i64))),
                    Location::Constant(_) => panic!("store to constant {}", cx.variable(*variable).name()),
                }
                if lane == 0 {
                    cx.invalidate_variable(*variable);
                }
                cx.set_variable(A, *variable, offset + lane);
            }
            Operand::Indirect { pointer, offset, .. } => {
                self.with_pointer(cx, *pointer, offset + lane, false, |cx, at| cx.emit(format!("ld {},a", at)));
                cx.invalidate_memory();
            }
            Operand::Register { register, .. } => {
                let part = self.registers.byte_part(*register, lane).unwrap_or(*register);
                if part != A {
                    cx.emit(format!("ld {},a", self.name_of(part)));
                    cx.add_changed(part);
                }
            }
            other => panic!("cannot assign to {}", other),
        }
    }

    /// Shape `mnemonic operand` for the second operand of an 8-bit
    /// arithmetic instruction and hand it to `body`
    fn with_alu_operand(
        &self,
        cx: &mut EmitContext<'_>,
        operand: &Operand,
        lane: usize,
        body: impl FnOnce(&mut EmitContext<'_>, &str),
    ) {
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(value) => body(cx, &value),
            Source::Register(register) => body(cx, self.name_of(register)),
            Source::Memory(at) => cx.with_register(HL, None, |cx| {
                cx.emit(format!("ld hl,{}", at));
                cx.add_changed(HL);
                body(cx, "(hl)");
            }),
            Source::Indirect { pointer, offset } => self.with_pointer(cx, pointer, offset, false, body),
        }
    }

    // ==================== Word moves ====================

    fn move_word(&self, cx: &mut EmitContext<'_>, from: RegisterId, to: RegisterId) {
        if PAIRS.contains(&from) && PAIRS.contains(&to) {
            let (from_low, from_high) = self.halves(from);
            let (to_low, to_high) = self.halves(to);
            cx.emit(format!("ld {},{}", self.name_of(to_high), self.name_of(from_high)));
            cx.emit(format!("ld {},{}", self.name_of(to_low), self.name_of(from_low)));
        } else {
            cx.emit(format!("push {}", self.name_of(from)));
            cx.emit(format!("pop {}", self.name_of(to)));
        }
    }

    fn load_word(&self, cx: &mut EmitContext<'_>, register: RegisterId, operand: &Operand) {
        if self.holds(cx, register, operand, 0) {
            return;
        }
        let name = self.name_of(register);
        match self.word_source(cx, operand) {
            Source::Immediate(value) => cx.emit(format!("ld {},{}", name, value)),
            Source::Register(source) if source == register => return,
            Source::Register(source) => self.move_word(cx, source, register),
            Source::Memory(at) => cx.emit(format!("ld {},({})", name, at)),
            Source::Indirect { pointer, offset } => self.load_word_indirect(cx, register, pointer, offset),
        }
        cx.add_changed(register);
        self.remember(cx, register, operand, 0);
    }

    fn load_word_indirect(&self, cx: &mut EmitContext<'_>, register: RegisterId, pointer: VariableId, offset: usize) {
        if is_index(register) {
            cx.with_register(HL, None, |cx| {
                self.load_word_indirect(cx, HL, pointer, offset);
                self.move_word(cx, HL, register);
            });
            return;
        }
        let (low, high) = self.halves(register);
        if let Location::Register(index) = cx.variable_location(pointer, 0) {
            if is_index(index) && offset < 126 {
                let index = self.name_of(index);
                cx.emit(format!("ld {},({}+{})", self.name_of(low), index, offset));
                cx.emit(format!("ld {},({}+{})", self.name_of(high), index, offset + 1));
                return;
            }
        }
        if register == HL {
            // HL is already ours: point it at the word and read through A
            let ty = cx.variable(pointer).ty().clone();
            self.load_word(cx, HL, &Operand::variable(ty, pointer));
            self.advance_hl(cx, offset);
            cx.with_register(A, None, |cx| {
                cx.emit("ld a,(hl)");
                cx.emit("inc hl");
                cx.emit("ld h,(hl)");
                cx.emit("ld l,a");
                cx.add_changed(A);
            });
            return;
        }
        self.with_pointer(cx, pointer, offset, true, |cx, at| {
            cx.emit(format!("ld {},{}", self.name_of(low), at));
            cx.emit("inc hl");
            cx.emit(format!("ld {},{}", self.name_of(high), at));
            cx.add_changed(HL);
        });
    }

    fn store_word(&self, cx: &mut EmitContext<'_>, register: RegisterId, destination: &Operand) {
        match destination {
            Operand::Variable { variable, offset, .. } => {
                match cx.variable_location(*variable, *offset) {
                    Location::Register(home) if home == register => {}
                    Location::Register(home) => {
                        self.move_word(cx, register, home);
                        cx.add_changed(home);
                    }
                    Location::Memory { label, offset } => {
                        cx.emit(format!("ld ({}),{}", address(&label, offset as i64), self.name_of(register)));
                    }
                    Location::Constant(_) => panic!("store to constant {}", cx.variable(*variable).name()),
                }
                cx.invalidate_variable(*variable);
                cx.set_variable(register, *variable, *offset);
            }
            Operand::Indirect { pointer, offset, .. } => {
                if register == HL {
                    cx.with_register(DE, None, |cx| {
                        self.move_word(cx, HL, DE);
                        cx.add_changed(DE);
                        self.store_word_indirect(cx, DE, *pointer, *offset);
                    });
                } else {
                    self.store_word_indirect(cx, register, *pointer, *offset);
                }
                cx.invalidate_memory();
            }
            Operand::Register { register: home, .. } => {
                if *home != register {
                    self.move_word(cx, register, *home);
                    cx.add_changed(*home);
                }
            }
            other => panic!("cannot assign to {}", other),
        }
    }

    fn store_word_indirect(&self, cx: &mut EmitContext<'_>, register: RegisterId, pointer: VariableId, offset: usize) {
        let (low, high) = self.halves(register);
        if let Location::Register(index) = cx.variable_location(pointer, 0) {
            if is_index(index) && offset < 126 {
                let index = self.name_of(index);
                cx.emit(format!("ld ({}+{}),{}", index, offset, self.name_of(low)));
                cx.emit(format!("ld ({}+{}),{}", index, offset + 1, self.name_of(high)));
                return;
            }
        }
        self.with_pointer(cx, pointer, offset, true, |cx, at| {
            cx.emit(format!("ld {},{}", at, self.name_of(low)));
            cx.emit("inc hl");
            cx.emit(format!("ld {},{}", at, self.name_of(high)));
            cx.add_changed(HL);
        });
    }

    // ==================== Instruction helpers ====================

    fn build_word_assign(&self, cx: &mut EmitContext<'_>, destination: &Operand, source: &Operand) {
        if let Some(home) = self.destination_register(cx, destination) {
            if !matches!(self.word_source(cx, source), Source::Indirect { .. }) {
                self.load_word(cx, home, source);
                if let Some(variable) = destination.variable_id() {
                    cx.invalidate_variable(variable);
                }
                return;
            }
        }
        if let (Operand::Variable { variable, offset, .. }, Source::Register(register)) =
            (destination, self.word_source(cx, source))
        {
            if let Location::Memory { label, offset } = cx.variable_location(*variable, *offset) {
                cx.emit(format!("ld ({}),{}", address(&label, offset as i64), self.name_of(register)));
                cx.invalidate_variable(*variable);
                return;
            }
        }
        cx.with_register(HL, Some(source), |cx| {
            self.load_word(cx, HL, source);
            cx.consume_operand(source, &[], Some(destination));
            self.store_word(cx, HL, destination);
        });
    }

    fn build_word_binomial(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) {
        let Binomial { operator, destination, left, right } = instruction;
        cx.with_register(HL, Some(left), |cx| {
            self.load_word(cx, HL, left);
            cx.consume_operand(left, &[right], Some(destination));
            match operator {
                BinOp::Shl => {
                    for _ in 0..instruction.shift_count() {
                        cx.emit("add hl,hl");
                    }
                }
                BinOp::Shr => {
                    for _ in 0..instruction.shift_count() {
                        cx.emit("srl h");
                        cx.emit("rr l");
                    }
                }
                _ => cx.with_register(DE, Some(right), |cx| {
                    self.load_word(cx, DE, right);
                    match operator {
                        BinOp::Add => cx.emit("add hl,de"),
                        BinOp::Sub => {
                            cx.emit("or a");
                            cx.emit("sbc hl,de");
                        }
                        _ => cx.with_register(A, None, |cx| {
                            let mnemonic = logic_mnemonic(*operator);
                            for (half, other) in [(L, E), (H, D)] {
                                cx.emit(format!("ld a,{}", self.name_of(half)));
                                cx.emit(format!("{} {}", mnemonic, self.name_of(other)));
                                cx.emit(format!("ld {},a", self.name_of(half)));
                            }
                            cx.add_changed(A);
                        }),
                    }
                }),
            }
            cx.add_changed(HL);
            self.store_word(cx, HL, destination);
        });
    }

    fn build_word_monomial(&self, cx: &mut EmitContext<'_>, instruction: &Monomial) {
        let Monomial { operator, destination, source } = instruction;
        cx.with_register(HL, Some(source), |cx| {
            self.load_word(cx, HL, source);
            cx.consume_operand(source, &[], Some(destination));
            cx.with_register(A, None, |cx| {
                for half in [L, H] {
                    cx.emit(format!("ld a,{}", self.name_of(half)));
                    cx.emit("cpl");
                    cx.emit(format!("ld {},a", self.name_of(half)));
                }
                cx.add_changed(A);
            });
            if *operator == UnOp::Neg {
                cx.emit("inc hl");
            }
            cx.add_changed(HL);
            self.store_word(cx, HL, destination);
        });
    }

    /// Load a value into the register or memory the callee expects it in
    fn pass_argument(&self, cx: &mut EmitContext<'_>, callee: &str, index: usize, argument: &Operand) {
        let label = labels::parameter_label(callee, index);
        if argument.size() == 1 {
            cx.with_register(A, Some(argument), |cx| {
                self.load_a(cx, argument, 0);
                cx.emit(format!("ld ({}),a", label));
            });
        } else {
            cx.with_register(HL, Some(argument), |cx| {
                self.load_word(cx, HL, argument);
                cx.emit(format!("ld ({}),hl", label));
            });
        }
    }
}

impl Default for Z80Target {
    fn default() -> Self {
        Self::new()
    }
}

fn logic_mnemonic(operator: BinOp) -> &'static str {
    match operator {
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        other => panic!("{} is not a bitwise operator", other),
    }
}

impl Target for Z80Target {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn registers(&self) -> &RegisterCatalog {
        &self.registers
    }

    fn parameter_register(&self, index: usize, ty: &IrType) -> Option<RegisterId> {
        match (index, ty.size) {
            _ if !ty.is_parameterizable() => None,
            (0, 1) => Some(E),
            (1, 1) => Some(C),
            (0, 2) => Some(DE),
            (1, 2) => Some(BC),
            _ => None,
        }
    }

    fn return_register(&self, ty: &IrType) -> Option<RegisterId> {
        if ty.is_byte() {
            Some(A)
        } else if ty.is_word() {
            Some(HL)
        } else {
            None
        }
    }

    fn variable_registers(&self, ty: &IrType) -> Vec<RegisterId> {
        if ty.is_byte() {
            BYTE_REGISTERS.to_vec()
        } else if ty.is_word() {
            WORD_REGISTERS.to_vec()
        } else {
            Vec::new()
        }
    }

    fn role_adaptability(
        &self,
        class: InstructionClass,
        role: OperandRole,
        operand: &Operand,
        register: RegisterId,
    ) -> Option<i32> {
        let ty = operand.ty();
        match role {
            // the result arrives in the return register and nowhere else
            OperandRole::Destination if class == InstructionClass::Call => {
                (self.return_register(ty) == Some(register)).then_some(2)
            }
            OperandRole::Argument(index) => {
                Some(if self.parameter_register(index, ty) == Some(register) { 2 } else { 0 })
            }
            OperandRole::Value => Some(if self.return_register(ty) == Some(register) { 2 } else { 0 }),
            OperandRole::Pointer => Some(match register {
                HL | IX | IY => 2,
                _ => 0,
            }),
            _ if ty.size == 1 => Some(match (role, register) {
                (OperandRole::Right, A) => -1,
                (_, A) => 2,
                _ => 1,
            }),
            _ => Some(match (role, register) {
                (OperandRole::Right, DE) => 2,
                (OperandRole::Right, HL) => -1,
                (_, HL) => 2,
                (_, IX | IY) => -1,
                _ => 1,
            }),
        }
    }

    fn bystander_adaptability(&self, class: InstructionClass, wide: bool, register: RegisterId) -> Option<i32> {
        let accumulator = if register == A { -2 } else { 0 };
        match class {
            InstructionClass::Call => Some(accumulator - 1),
            InstructionClass::Jump | InstructionClass::Return | InstructionClass::Empty => Some(0),
            _ => {
                let working = wide && [H, L, HL, D, E, DE].contains(&register);
                Some(accumulator - i32::from(working))
            }
        }
    }

    fn allocate_registers(&self, function: &mut Function) {
        allocate_greedy(function, self);
    }

    fn copy_candidates(&self, register: RegisterId) -> Vec<RegisterId> {
        if BYTE_REGISTERS.contains(&register) {
            BYTE_REGISTERS.iter().copied().filter(|&r| r != register).collect()
        } else if PAIRS.contains(&register) {
            PAIRS.iter().copied().filter(|&r| r != register).collect()
        } else {
            Vec::new()
        }
    }

    fn copy_register(&self, cx: &mut EmitContext<'_>, from: RegisterId, to: RegisterId) {
        if self.registers.width(from) == 2 {
            self.move_word(cx, from, to);
        } else {
            cx.emit(format!("ld {},{}", self.name_of(to), self.name_of(from)));
        }
    }

    fn save_unit(&self, register: RegisterId) -> RegisterId {
        self.registers.container(register).unwrap_or(register)
    }

    fn save_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        cx.emit(format!("ld ({}),{}", slot, self.name_of(unit)));
    }

    // loads leave the flags alone
    fn restore_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        cx.emit(format!("ld {},({})", self.name_of(unit), slot));
    }

    fn region_save(&self, registers: &[RegisterId]) -> Vec<String> {
        registers
            .iter()
            .map(|&register| match self.save_unit(register) {
                A => "push af".to_string(),
                unit => format!("push {}", self.name_of(unit)),
            })
            .collect()
    }

    fn region_restore(&self, registers: &[RegisterId]) -> Vec<String> {
        registers
            .iter()
            .rev()
            .map(|&register| match self.save_unit(register) {
                A => "pop af".to_string(),
                unit => format!("pop {}", self.name_of(unit)),
            })
            .collect()
    }

    fn build_assign(&self, cx: &mut EmitContext<'_>, instruction: &Assign) {
        let Assign { destination, source } = instruction;
        cx.cancel_destination_register(destination, &[source]);
        if destination.size() == 2 {
            self.build_word_assign(cx, destination, source);
            return;
        }
        if let Some(home) = self.destination_register(cx, destination) {
            if matches!(self.byte_source(cx, source, 0), Source::Immediate(_) | Source::Register(_)) {
                self.load_byte(cx, home, source, 0);
                if let Some(variable) = destination.variable_id() {
                    cx.invalidate_variable(variable);
                }
                return;
            }
        }
        cx.with_register(A, Some(source), |cx| {
            self.load_a(cx, source, 0);
            cx.consume_operand(source, &[], Some(destination));
            self.store_a(cx, destination, 0);
        });
    }

    fn build_binomial(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) {
        let Binomial { operator, destination, left, right } = instruction;
        cx.cancel_destination_register(destination, &[left, right]);
        if destination.size() == 2 {
            self.build_word_binomial(cx, instruction);
            return;
        }
        cx.with_register(A, Some(left), |cx| {
            self.load_a(cx, left, 0);
            cx.consume_operand(left, &[right], Some(destination));
            match operator {
                BinOp::Shl => {
                    for _ in 0..instruction.shift_count() {
                        cx.emit("add a,a");
                    }
                }
                BinOp::Shr => {
                    for _ in 0..instruction.shift_count() {
                        cx.emit("srl a");
                    }
                }
                BinOp::Add => self.with_alu_operand(cx, right, 0, |cx, text| cx.emit(format!("add a,{}", text))),
                BinOp::Sub => self.with_alu_operand(cx, right, 0, |cx, text| cx.emit(format!("sub {}", text))),
                BinOp::And | BinOp::Or | BinOp::Xor => {
                    let mnemonic = logic_mnemonic(*operator);
                    self.with_alu_operand(cx, right, 0, |cx, text| cx.emit(format!("{} {}", mnemonic, text)));
                }
            }
            cx.add_changed(A);
            self.store_a(cx, destination, 0);
        });
    }

    fn build_monomial(&self, cx: &mut EmitContext<'_>, instruction: &Monomial) {
        let Monomial { operator, destination, source } = instruction;
        cx.cancel_destination_register(destination, &[source]);
        if destination.size() == 2 {
            self.build_word_monomial(cx, instruction);
            return;
        }
        cx.with_register(A, Some(source), |cx| {
            self.load_a(cx, source, 0);
            cx.consume_operand(source, &[], Some(destination));
            cx.emit(match operator {
                UnOp::Neg => "neg",
                UnOp::BitNot => "cpl",
            });
            cx.add_changed(A);
            self.store_a(cx, destination, 0);
        });
    }

    fn build_compare_jump(&self, cx: &mut EmitContext<'_>, instruction: &CompareJump) {
        let CompareJump { operator, left, right, anchor } = instruction;
        if left.size() == 2 {
            cx.with_register(HL, Some(left), |cx| {
                self.load_word(cx, HL, left);
                cx.consume_operand(left, &[right], None);
                cx.with_register(DE, Some(right), |cx| {
                    self.load_word(cx, DE, right);
                    cx.emit("or a");
                    cx.emit("sbc hl,de");
                    cx.add_changed(HL);
                    cx.set_flags_live(true);
                });
            });
        } else {
            cx.with_register(A, Some(left), |cx| {
                self.load_a(cx, left, 0);
                cx.consume_operand(left, &[right], None);
                self.with_alu_operand(cx, right, 0, |cx, text| {
                    cx.emit(format!("cp {}", text));
                    cx.set_flags_live(true);
                });
            });
        }
        cx.set_flags_live(false);
        let condition = match operator {
            CmpOp::Eq => "z",
            CmpOp::Ne => "nz",
            CmpOp::Lt => "c",
            CmpOp::Ge => "nc",
        };
        let label = cx.anchor_label(*anchor);
        cx.emit(format!("jp {},{}", condition, label));
    }

    fn build_jump(&self, cx: &mut EmitContext<'_>, instruction: &Jump) {
        let label = cx.anchor_label(instruction.anchor);
        cx.emit(format!("jp {}", label));
    }

    fn build_call(&self, cx: &mut EmitContext<'_>, instruction: &Call) {
        let Call { callee, arguments, destination } = instruction;

        // memory arguments first: they pass through A and HL
        for (index, argument) in arguments.iter().enumerate() {
            if self.parameter_register(index, argument.ty()).is_none() {
                self.pass_argument(cx, callee, index, argument);
            }
        }
        let mut reservations = Vec::new();
        for (index, argument) in arguments.iter().enumerate() {
            let Some(register) = self.parameter_register(index, argument.ty()) else {
                continue;
            };
            let reservation = cx.reserve(register, Some(argument));
            if argument.size() == 1 {
                self.load_byte(cx, register, argument, 0);
            } else {
                self.load_word(cx, register, argument);
            }
            reservations.push(reservation);
        }

        cx.emit(format!("call {}", callee));
        while let Some(reservation) = reservations.pop() {
            cx.discard(reservation);
        }
        cx.add_changed_all();

        let Some(destination) = destination else {
            return;
        };
        match self.return_register(destination.ty()) {
            Some(A) => self.store_a(cx, destination, 0),
            Some(register) => self.store_word(cx, register, destination),
            None => panic!("{} cannot be returned in a register", destination.ty()),
        }
    }

    fn build_return(&self, cx: &mut EmitContext<'_>, instruction: &Return) {
        if let Some(value) = &instruction.value {
            match self.return_register(value.ty()) {
                Some(A) => cx.with_register(A, Some(value), |cx| self.load_a(cx, value, 0)),
                Some(register) => cx.with_register(register, Some(value), |cx| self.load_word(cx, register, value)),
                None => panic!("{} cannot be returned in a register", value.ty()),
            }
        }
        let exit = cx.exit_label();
        cx.emit(format!("jp {}", exit));
    }

    fn code_segment(&self) -> Vec<String> {
        vec!["\tcseg".to_string()]
    }

    fn data_segment(&self) -> Vec<String> {
        vec!["\tdseg".to_string()]
    }

    fn public_symbol(&self, label: &str) -> String {
        format!("\tpublic {}", label)
    }

    fn extern_symbol(&self, label: &str) -> String {
        format!("\textrn {}", label)
    }

    fn return_code(&self) -> Vec<String> {
        vec!["ret".to_string()]
    }

    fn define_bytes(&self, label: &str, bytes: &[u8]) -> Vec<String> {
        bytes
            .chunks(16)
            .enumerate()
            .map(|(index, chunk)| {
                let values: Vec<String> = chunk.iter().map(|b| b.to_string()).collect();
                let prefix = if index == 0 { format!("{}:", label) } else { String::new() };
                format!("{}\tdb {}", prefix, values.join(","))
            })
            .collect()
    }

    fn reserve_bytes(&self, label: &str, size: usize) -> Vec<String> {
        vec![format!("{}:\tds {}", label, size)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Relation};
    use crate::types::IrType;
    use pretty_assertions::assert_eq;

    fn codes(function: &Function, address: usize) -> Vec<&str> {
        function.instruction(address).codes().iter().map(String::as_str).collect()
    }

    #[test]
    fn test_constant_store_and_reuse() {
        let target = Z80Target::new();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let g = b.global("g", IrType::byte());
        let h = b.global("h", IrType::byte());
        b.assign(b.operand(g), Operand::integer(IrType::byte(), 5));
        b.assign(b.operand(h), b.operand(g));
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(codes(&f, 0), vec!["ld a,5", "ld (g),a"]);
        assert_eq!(codes(&f, 1), vec!["ld (h),a"]);
        assert_eq!(codes(&f, 2), vec!["jp f_exit"]);
    }

    #[test]
    fn test_word_addition_in_hl() {
        let target = Z80Target::new();
        let word = IrType::word();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let u = b.global("u", word.clone());
        let v = b.global("v", word.clone());
        let w = b.global("w", word);
        b.binomial(BinOp::Add, b.operand(w), b.operand(u), b.operand(v));
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(codes(&f, 0), vec!["ld hl,(u)", "ld de,(v)", "add hl,de", "ld (w),hl"]);
    }

    #[test]
    fn test_byte_compare_jump() {
        let target = Z80Target::new();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let g = b.global("g", IrType::byte());
        let done = b.create_anchor();
        b.branch(Relation::Lt, b.operand(g), Operand::integer(IrType::byte(), 10), done);
        b.place_anchor(done);
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(codes(&f, 0), vec!["ld a,(g)", "cp 10", "jp c,f_L0"]);
    }

    #[test]
    fn test_register_parameter_returned() {
        let target = Z80Target::new();
        let mut b = FunctionBuilder::new("id", IrType::byte(), &target);
        let x = b.parameter("x", IrType::byte());
        b.ret(Some(b.operand(x)));
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(f.variable(x).register(), Some(E));
        assert!(f.prologue().is_empty());
        assert_eq!(codes(&f, 0), vec!["ld a,e", "jp id_exit"]);
    }

    #[test]
    fn test_call_loads_parameter_registers() {
        let target = Z80Target::new();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let g = b.global("g", IrType::byte());
        let w = b.global("w", IrType::word());
        b.call("put", vec![b.operand(g), b.operand(w)], None);
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(codes(&f, 0), vec!["ld a,(g)", "ld e,a", "ld bc,(w)", "call put"]);
    }

    #[test]
    fn test_store_through_pointer_in_memory() {
        let target = Z80Target::new();
        let byte = IrType::byte();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let p = b.global("p", IrType::ptr(byte.clone()));
        b.assign(Operand::indirect(byte.clone(), p, 1), Operand::integer(byte, 7));
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(codes(&f, 0), vec!["ld a,7", "ld hl,(p)", "inc hl", "ld (hl),a"]);
    }

    #[test]
    fn test_adaptability_prefers_accumulator_and_hl() {
        let target = Z80Target::new();
        let byte = Operand::integer(IrType::byte(), 0);
        let word = Operand::integer(IrType::word(), 0);
        let binomial = InstructionClass::Binomial;
        assert_eq!(target.role_adaptability(binomial, OperandRole::Left, &byte, A), Some(2));
        assert_eq!(target.role_adaptability(binomial, OperandRole::Right, &byte, A), Some(-1));
        assert_eq!(target.role_adaptability(binomial, OperandRole::Left, &word, HL), Some(2));
        assert_eq!(target.role_adaptability(binomial, OperandRole::Right, &word, DE), Some(2));
        assert_eq!(target.role_adaptability(InstructionClass::Call, OperandRole::Destination, &word, DE), None);
        assert_eq!(target.role_adaptability(InstructionClass::Call, OperandRole::Destination, &word, HL), Some(2));
        assert_eq!(target.bystander_adaptability(InstructionClass::Call, false, A), Some(-3));
        assert_eq!(target.bystander_adaptability(binomial, true, L), Some(-1));
    }

    #[test]
    fn test_region_code_uses_pairs() {
        let target = Z80Target::new();
        assert_eq!(target.region_save(&[BC, A]), vec!["push bc", "push af"]);
        assert_eq!(target.region_restore(&[BC, A]), vec!["pop af", "pop bc"]);
        assert_eq!(target.save_unit(L), HL);
        assert_eq!(target.saved_offset(HL, H), 1);
    }

    #[test]
    fn test_define_bytes_splits_long_data() {
        let target = Z80Target::new();
        let bytes: Vec<u8> = (0..18).collect();
        let lines = target.define_bytes("t", &bytes);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("t:\tdb 0,1,2"));
        assert_eq!(lines[1], "\tdb 16,17");
    }
}
