//! 6502 code emitter
//!
//! All arithmetic runs through the accumulator, words one byte at a time
//! with the carry chaining the halves. Memory behind a pointer is reached
//! by copying the pointer to the zero page word `__ptr` and addressing
//! `(__ptr),y`, so Y is borrowed for every indirect access.

use super::registers::*;
use crate::core::{
    allocate_greedy, labels, EmitContext, Function, InstructionClass, Location, Operand, OperandRole,
    RegisterCatalog, RegisterId, Target, VariableId,
};
use crate::ir::{Assign, BinOp, Binomial, Call, CmpOp, CompareJump, Jump, Monomial, Return, UnOp};
use crate::types::IrType;

/// Zero page copy of the pointer being dereferenced
const POINTER: &str = "__ptr";
/// Byte used to feed an index register to an accumulator instruction
const WORK: &str = "__work";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// Operand text including the `#`
    Immediate(String),
    Register(RegisterId),
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

fn immediate_half(expression: &str, lane: usize) -> String {
    let selector = if lane == 0 { '<' } else { '>' };
    if expression.contains(['+', '-']) {
        format!("#{}({})", selector, expression)
    } else {
        format!("#{}{}", selector, expression)
    }
}

#[derive(Debug)]
pub struct Mos6502Target {
    registers: RegisterCatalog,
}

impl Mos6502Target {
    pub fn new() -> Self {
        Self { registers: catalog() }
    }

    fn byte_source(&self, cx: &EmitContext<'_>, operand: &Operand, lane: usize) -> Source {
        match operand {
            Operand::Integer { value, .. } => Source::Immediate(format!("#{}", lane_of(*value, lane))),
            Operand::String { label, .. } => Source::Immediate(immediate_half(label, lane)),
            Operand::Pointer { symbol, offset, .. } => Source::Immediate(immediate_half(&address(symbol, *offset), lane)),
            Operand::Variable { variable, offset, .. } => match cx.variable_location(*variable, offset + lane) {
                Location::Register(register) => Source::Register(register),
                Location::Memory { label, offset } => Source::Memory(address(&label, offset as i64)),
                Location::Constant(value) => Source::Immediate(format!("#{}", value & 0xff)),
            },
            Operand::Indirect { pointer, offset, .. } => Source::Indirect { pointer: *pointer, offset: offset + lane },
            Operand::Register { register, .. } => match self.registers.byte_part(*register, lane) {
                Some(part) => Source::Register(part),
                None => panic!("byte {} of {} is not addressable", lane, self.registers.name(*register)),
            },
        }
    }

    fn holds(&self, cx: &EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) -> bool {
        match operand {
            Operand::Integer { value, .. } => cx.is_constant_assigned(register, lane_of(*value, lane)),
            Operand::Variable { variable, offset, .. } => cx.is_variable_assigned(register, *variable, offset + lane),
            _ => false,
        }
    }

    fn remember(&self, cx: &mut EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) {
        match operand {
            Operand::Integer { value, .. } => cx.set_constant(register, lane_of(*value, lane)),
            Operand::Variable { variable, offset, .. } => cx.set_variable(register, *variable, offset + lane),
            _ => {}
        }
    }

    fn destination_register(&self, cx: &EmitContext<'_>, destination: &Operand) -> Option<RegisterId> {
        match destination {
            Operand::Variable { variable, offset, .. } => match cx.variable_location(*variable, *offset) {
                Location::Register(register) => Some(register),
                _ => None,
            },
            _ => None,
        }
    }

    /// Copy `pointer` to the zero page, point Y at `offset` and run `body`
    /// with the addressing text
    fn with_pointer(
        &self,
        cx: &mut EmitContext<'_>,
        pointer: VariableId,
        offset: usize,
        body: impl FnOnce(&mut EmitContext<'_>, &str),
    ) {
        cx.with_register(Y, None, |cx| {
            for lane in 0..2 {
                let text = match cx.variable_location(pointer, lane) {
                    Location::Memory { label, offset } => address(&label, offset as i64),
                    Location::Constant(value) => format!("#{}", value & 0xff),
                    Location::Register(register) => {
                        panic!("pointer {} in register {}", cx.variable(pointer).name(), self.registers.name(register))
                    }
                };
                cx.emit(format!("ldy {}", text));
                cx.emit(format!("sty {}", address(POINTER, lane as i64)));
            }
            cx.emit(format!("ldy #{}", offset));
            cx.add_changed(Y);
            body(cx, &format!("({}),y", POINTER));
        });
    }

    fn load_a(&self, cx: &mut EmitContext<'_>, operand: &Operand, lane: usize) {
        if self.holds(cx, A, operand, lane) {
            return;
        }
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(text) | Source::Memory(text) => cx.emit(format!("lda {}", text)),
            Source::Register(A) => {}
            Source::Register(register) => cx.emit(format!("t{}a", suffix(register))),
            Source::Indirect { pointer, offset } => {
                self.with_pointer(cx, pointer, offset, |cx, at| cx.emit(format!("lda {}", at)));
            }
        }
        cx.add_changed(A);
        self.remember(cx, A, operand, lane);
    }

    /// Load byte `lane` of `operand` into X or Y
    fn load_index(&self, cx: &mut EmitContext<'_>, register: RegisterId, operand: &Operand, lane: usize) {
        if register == A {
            self.load_a(cx, operand, lane);
            return;
        }
        if self.holds(cx, register, operand, lane) {
            return;
        }
        let name = suffix(register);
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(text) | Source::Memory(text) => cx.emit(format!("ld{} {}", name, text)),
            Source::Register(source) if source == register => return,
            Source::Register(A) => cx.emit(format!("ta{}", name)),
            // no transfer between the index registers
            Source::Register(_) | Source::Indirect { .. } => cx.with_register(A, Some(operand), |cx| {
                self.load_a(cx, operand, lane);
                cx.emit(format!("ta{}", name));
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
                        cx.emit(format!("ta{}", suffix(register)));
                        cx.add_changed(register);
                    }
                    Location::Memory { label, offset } => cx.emit(format!("sta {}", address(&label, offset as i64))),
                    Location::Constant(_) => panic!("store to constant {}", cx.variable(*variable).name()),
                }
                if lane == 0 {
                    cx.invalidate_variable(*variable);
                }
                cx.set_variable(A, *variable, offset + lane);
            }
            Operand::Indirect { pointer, offset, .. } => {
                self.with_pointer(cx, *pointer, offset + lane, |cx, at| cx.emit(format!("sta {}", at)));
                cx.invalidate_memory();
            }
            Operand::Register { register, .. } => {
                let part = self.registers.byte_part(*register, lane).unwrap_or(*register);
                if part != A {
                    cx.emit(format!("ta{}", suffix(part)));
                    cx.add_changed(part);
                }
            }
            other => panic!("cannot assign to {}", other),
        }
    }

    /// Hand `body` the operand text of byte `lane` of `operand` for an
    /// accumulator instruction
    fn with_alu_operand(
        &self,
        cx: &mut EmitContext<'_>,
        operand: &Operand,
        lane: usize,
        body: impl FnOnce(&mut EmitContext<'_>, &str),
    ) {
        match self.byte_source(cx, operand, lane) {
            Source::Immediate(text) | Source::Memory(text) => body(cx, &text),
            Source::Register(A) => panic!("{} shares the accumulator with the other operand", operand),
            Source::Register(register) => {
                cx.emit(format!("st{} {}", suffix(register), WORK));
                body(cx, WORK);
            }
            Source::Indirect { pointer, offset } => self.with_pointer(cx, pointer, offset, body),
        }
    }

    /// Combine the accumulator with byte `lane` of `operand`. The carry
    /// is prepared on the low byte and chains into the high byte.
    fn arithmetic(&self, cx: &mut EmitContext<'_>, operator: BinOp, operand: &Operand, lane: usize) {
        self.with_alu_operand(cx, operand, lane, |cx, text| match operator {
            BinOp::Add => {
                if lane == 0 {
                    cx.emit("clc");
                }
                cx.emit(format!("adc {}", text));
            }
            BinOp::Sub => {
                if lane == 0 {
                    cx.emit("sec");
                }
                cx.emit(format!("sbc {}", text));
            }
            BinOp::And => cx.emit(format!("and {}", text)),
            BinOp::Or => cx.emit(format!("ora {}", text)),
            BinOp::Xor => cx.emit(format!("eor {}", text)),
            BinOp::Shl | BinOp::Shr => panic!("shift by {}", text),
        });
    }

    /// `inx`/`dex` style update of an index register variable in place
    fn try_step(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) -> bool {
        let Binomial { operator, destination, left, right } = instruction;
        let Some(register) = self.destination_register(cx, destination) else {
            return false;
        };
        if register == A || left != destination || right.integer_value() != Some(1) {
            return false;
        }
        let mnemonic = match operator {
            BinOp::Add => "in",
            BinOp::Sub => "de",
            _ => return false,
        };
        cx.emit(format!("{}{}", mnemonic, suffix(register)));
        cx.add_changed(register);
        if let Some(variable) = destination.variable_id() {
            cx.invalidate_variable(variable);
        }
        true
    }

    fn build_word_shift(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) {
        let Binomial { operator, destination, left, .. } = instruction;
        cx.with_register(A, Some(left), |cx| {
            self.load_a(cx, left, 1);
            cx.emit(format!("sta {}", WORK));
            self.load_a(cx, left, 0);
            for _ in 0..instruction.shift_count() {
                if *operator == BinOp::Shl {
                    cx.emit("asl a");
                    cx.emit(format!("rol {}", WORK));
                } else {
                    cx.emit(format!("lsr {}", WORK));
                    cx.emit("ror a");
                }
            }
            cx.add_changed(A);
            self.store_a(cx, destination, 0);
            cx.emit(format!("lda {}", WORK));
            cx.add_changed(A);
            self.store_a(cx, destination, 1);
        });
    }

    fn pass_argument(&self, cx: &mut EmitContext<'_>, callee: &str, index: usize, argument: &Operand) {
        let label = labels::parameter_label(callee, index);
        cx.with_register(A, Some(argument), |cx| {
            for lane in 0..argument.size() {
                self.load_a(cx, argument, lane);
                cx.emit(format!("sta {}", address(&label, lane as i64)));
            }
        });
    }

    /// Wrap flag-changing relocation code while a comparison is pending
    fn preserving_flags(&self, cx: &mut EmitContext<'_>, body: impl FnOnce(&mut EmitContext<'_>)) {
        let live = cx.flags_live();
        if live {
            cx.emit("php");
        }
        body(cx);
        if live {
            cx.emit("plp");
        }
    }
}

impl Default for Mos6502Target {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for Mos6502Target {
    fn name(&self) -> &'static str {
        "mos6502"
    }

    fn registers(&self) -> &RegisterCatalog {
        &self.registers
    }

    fn parameter_register(&self, index: usize, ty: &IrType) -> Option<RegisterId> {
        if !ty.is_byte() {
            return None;
        }
        INDEX_REGISTERS.get(index).copied()
    }

    fn return_register(&self, ty: &IrType) -> Option<RegisterId> {
        ty.is_byte().then_some(A)
    }

    fn variable_registers(&self, ty: &IrType) -> Vec<RegisterId> {
        if ty.is_byte() { INDEX_REGISTERS.to_vec() } else { Vec::new() }
    }

    fn role_adaptability(
        &self,
        class: InstructionClass,
        role: OperandRole,
        operand: &Operand,
        register: RegisterId,
    ) -> Option<i32> {
        match role {
            // results come back in the accumulator, which holds no variables
            OperandRole::Destination if class == InstructionClass::Call => None,
            OperandRole::Argument(index) => {
                Some(if self.parameter_register(index, operand.ty()) == Some(register) { 2 } else { 0 })
            }
            OperandRole::Value | OperandRole::Pointer => Some(0),
            OperandRole::Right => Some(-1),
            _ => Some(1),
        }
    }

    fn bystander_adaptability(&self, class: InstructionClass, _wide: bool, register: RegisterId) -> Option<i32> {
        match class {
            InstructionClass::Call => Some(-2),
            InstructionClass::Jump | InstructionClass::Return | InstructionClass::Empty => Some(0),
            // Y is borrowed by every indirect access
            _ => Some(if register == Y { -1 } else { 0 }),
        }
    }

    fn allocate_registers(&self, function: &mut Function) {
        allocate_greedy(function, self);
    }

    fn copy_candidates(&self, register: RegisterId) -> Vec<RegisterId> {
        match register {
            A => INDEX_REGISTERS.to_vec(),
            _ => vec![A],
        }
    }

    fn copy_register(&self, cx: &mut EmitContext<'_>, from: RegisterId, to: RegisterId) {
        let line = format!("t{}{}", suffix(from), suffix(to));
        self.preserving_flags(cx, |cx| cx.emit(line));
    }

    fn save_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        cx.emit(format!("st{} {}", suffix(unit), slot));
    }

    fn restore_register(&self, cx: &mut EmitContext<'_>, unit: RegisterId, slot: &str) {
        let line = format!("ld{} {}", suffix(unit), slot);
        self.preserving_flags(cx, |cx| cx.emit(line));
    }

    fn region_save(&self, registers: &[RegisterId]) -> Vec<String> {
        let mut lines = Vec::new();
        for &register in registers {
            if register != A {
                lines.push(format!("t{}a", suffix(register)));
            }
            lines.push("pha".to_string());
        }
        lines
    }

    fn region_restore(&self, registers: &[RegisterId]) -> Vec<String> {
        let mut lines = Vec::new();
        for &register in registers.iter().rev() {
            lines.push("pla".to_string());
            if register != A {
                lines.push(format!("ta{}", suffix(register)));
            }
        }
        lines
    }

    fn build_assign(&self, cx: &mut EmitContext<'_>, instruction: &Assign) {
        let Assign { destination, source } = instruction;
        cx.cancel_destination_register(destination, &[source]);
        if destination.size() == 1 {
            let source_location = self.byte_source(cx, source, 0);
            if let Some(home) = self.destination_register(cx, destination) {
                let direct = match &source_location {
                    Source::Immediate(_) | Source::Memory(_) => true,
                    Source::Register(register) => *register == A || *register == home,
                    Source::Indirect { .. } => false,
                };
                if direct {
                    self.load_index(cx, home, source, 0);
                    if let Some(variable) = destination.variable_id() {
                        cx.invalidate_variable(variable);
                    }
                    return;
                }
            }
            if let (Operand::Variable { variable, offset, .. }, Source::Register(register)) = (destination, &source_location) {
                if let Location::Memory { label, offset } = cx.variable_location(*variable, *offset) {
                    cx.emit(format!("st{} {}", suffix(*register), address(&label, offset as i64)));
                    cx.invalidate_variable(*variable);
                    return;
                }
            }
        }
        cx.with_register(A, Some(source), |cx| {
            for lane in 0..destination.size() {
                self.load_a(cx, source, lane);
                self.store_a(cx, destination, lane);
            }
        });
    }

    fn build_binomial(&self, cx: &mut EmitContext<'_>, instruction: &Binomial) {
        let Binomial { operator, destination, left, right } = instruction;
        cx.cancel_destination_register(destination, &[left, right]);
        if self.try_step(cx, instruction) {
            return;
        }
        let size = destination.size();
        match operator {
            BinOp::Shl | BinOp::Shr if size == 2 => self.build_word_shift(cx, instruction),
            BinOp::Shl | BinOp::Shr => cx.with_register(A, Some(left), |cx| {
                self.load_a(cx, left, 0);
                cx.consume_operand(left, &[], Some(destination));
                let mnemonic = if *operator == BinOp::Shl { "asl a" } else { "lsr a" };
                for _ in 0..instruction.shift_count() {
                    cx.emit(mnemonic);
                }
                cx.add_changed(A);
                self.store_a(cx, destination, 0);
            }),
            _ => cx.with_register(A, Some(left), |cx| {
                for lane in 0..size {
                    self.load_a(cx, left, lane);
                    self.arithmetic(cx, *operator, right, lane);
                    cx.add_changed(A);
                    self.store_a(cx, destination, lane);
                }
            }),
        }
    }

    fn build_monomial(&self, cx: &mut EmitContext<'_>, instruction: &Monomial) {
        let Monomial { operator, destination, source } = instruction;
        cx.cancel_destination_register(destination, &[source]);
        cx.with_register(A, Some(source), |cx| {
            for lane in 0..destination.size() {
                self.load_a(cx, source, lane);
                cx.emit("eor #255");
                if *operator == UnOp::Neg {
                    if lane == 0 {
                        cx.emit("clc");
                        cx.emit("adc #1");
                    } else {
                        cx.emit("adc #0");
                    }
                }
                cx.add_changed(A);
                self.store_a(cx, destination, lane);
            }
        });
    }

    fn build_compare_jump(&self, cx: &mut EmitContext<'_>, instruction: &CompareJump) {
        let CompareJump { operator, left, right, anchor } = instruction;
        let index_compare = match (self.byte_source(cx, left, 0), self.byte_source(cx, right, 0)) {
            (Source::Register(register), Source::Immediate(text) | Source::Memory(text))
                if left.size() == 1 && register != A =>
            {
                Some((register, text))
            }
            _ => None,
        };

        if let Some((register, text)) = index_compare {
            cx.emit(format!("cp{} {}", suffix(register), text));
        } else if left.size() == 1 {
            cx.with_register(A, Some(left), |cx| {
                self.load_a(cx, left, 0);
                cx.consume_operand(left, &[right], None);
                self.with_alu_operand(cx, right, 0, |cx, text| {
                    cx.emit(format!("cmp {}", text));
                    cx.set_flags_live(true);
                });
            });
        } else if matches!(operator, CmpOp::Eq | CmpOp::Ne) {
            // Z is set when every byte of the difference is zero
            cx.with_register(A, Some(left), |cx| {
                self.load_a(cx, left, 0);
                self.with_alu_operand(cx, right, 0, |cx, text| cx.emit(format!("eor {}", text)));
                cx.emit(format!("sta {}", WORK));
                cx.add_changed(A);
                self.load_a(cx, left, 1);
                self.with_alu_operand(cx, right, 1, |cx, text| cx.emit(format!("eor {}", text)));
                cx.emit(format!("ora {}", WORK));
                cx.add_changed(A);
                cx.set_flags_live(true);
            });
        } else {
            // the carry of a two byte subtraction orders the operands
            cx.with_register(A, Some(left), |cx| {
                self.load_a(cx, left, 0);
                self.with_alu_operand(cx, right, 0, |cx, text| cx.emit(format!("cmp {}", text)));
                self.load_a(cx, left, 1);
                self.with_alu_operand(cx, right, 1, |cx, text| cx.emit(format!("sbc {}", text)));
                cx.add_changed(A);
                cx.set_flags_live(true);
            });
        }
        cx.set_flags_live(false);

        // branches only reach 127 bytes; skip over a jmp instead
        let skip = match operator {
            CmpOp::Eq => "bne",
            CmpOp::Ne => "beq",
            CmpOp::Lt => "bcs",
            CmpOp::Ge => "bcc",
        };
        let label = cx.anchor_label(*anchor);
        cx.emit(format!("{} *+5", skip));
        cx.emit(format!("jmp {}", label));
    }

    fn build_jump(&self, cx: &mut EmitContext<'_>, instruction: &Jump) {
        let label = cx.anchor_label(instruction.anchor);
        cx.emit(format!("jmp {}", label));
    }

    fn build_call(&self, cx: &mut EmitContext<'_>, instruction: &Call) {
        let Call { callee, arguments, destination } = instruction;
        // a save region may have pushed through the accumulator
        cx.remove_register(A);

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
            self.load_index(cx, register, argument, 0);
            reservations.push(reservation);
        }

        cx.emit(format!("jsr {}", callee));
        while let Some(reservation) = reservations.pop() {
            cx.discard(reservation);
        }
        cx.add_changed_all();

        if let Some(destination) = destination {
            if destination.size() == 1 {
                self.store_a(cx, destination, 0);
            } else {
                let result = labels::result_label(callee);
                cx.with_register(A, None, |cx| {
                    for lane in 0..destination.size() {
                        cx.emit(format!("lda {}", address(&result, lane as i64)));
                        cx.add_changed(A);
                        self.store_a(cx, destination, lane);
                    }
                });
            }
        }
        cx.remove_register(A);
    }

    fn build_return(&self, cx: &mut EmitContext<'_>, instruction: &Return) {
        if let Some(value) = &instruction.value {
            if value.size() == 1 {
                cx.with_register(A, Some(value), |cx| self.load_a(cx, value, 0));
            } else {
                let result = labels::result_label(cx.function_name());
                cx.with_register(A, Some(value), |cx| {
                    for lane in 0..value.size() {
                        self.load_a(cx, value, lane);
                        cx.emit(format!("sta {}", address(&result, lane as i64)));
                    }
                });
            }
        }
        let exit = cx.exit_label();
        cx.emit(format!("jmp {}", exit));
    }

    fn code_segment(&self) -> Vec<String> {
        vec!["\t.segment \"CODE\"".to_string()]
    }

    fn data_segment(&self) -> Vec<String> {
        vec!["\t.segment \"DATA\"".to_string()]
    }

    fn runtime_segment(&self) -> Vec<String> {
        vec!["\t.segment \"ZEROPAGE\"".to_string()]
    }

    fn public_symbol(&self, label: &str) -> String {
        format!("\t.export {}", label)
    }

    fn extern_symbol(&self, label: &str) -> String {
        format!("\t.import {}", label)
    }

    fn return_code(&self) -> Vec<String> {
        vec!["rts".to_string()]
    }

    fn define_bytes(&self, label: &str, bytes: &[u8]) -> Vec<String> {
        bytes
            .chunks(16)
            .enumerate()
            .map(|(index, chunk)| {
                let values: Vec<String> = chunk.iter().map(|b| b.to_string()).collect();
                let prefix = if index == 0 { format!("{}:", label) } else { String::new() };
                format!("{}\t.byte {}", prefix, values.join(","))
            })
            .collect()
    }

    fn reserve_bytes(&self, label: &str, size: usize) -> Vec<String> {
        vec![format!("{}:\t.res {}", label, size)]
    }

    fn runtime_data(&self) -> Vec<(String, usize)> {
        vec![(POINTER.to_string(), 2), (WORK.to_string(), 1)]
    }
}
