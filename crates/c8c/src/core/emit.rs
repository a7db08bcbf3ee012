//! Per-instruction code emission context
//!
//! An `EmitContext` lives for the emission of exactly one instruction. It
//! owns the code buffer, the register knowledge carried in from the
//! predecessors and the stack of active reservations (see
//! [`reservation`](super::reservation)).

use std::collections::BTreeSet;

use tracing::trace;

use super::anchor::{Anchor, AnchorId};
use super::instruction::{InstructionKind, InstructionState, RegisterContent};
use super::labels;
use super::operand::Operand;
use super::register::{RegisterCatalog, RegisterId};
use super::reservation::{ActiveReservation, OperandHold, Relocation};
use super::target::Target;
use super::variable::{Address, Storage, Variable, VariableId};

/// Where a value can be read right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Register(RegisterId),
    Memory { label: String, offset: usize },
    Constant(i64),
}

pub struct EmitContext<'a> {
    pub(super) target: &'a dyn Target,
    pub(super) function: &'a str,
    pub(super) variables: &'a [Variable],
    pub(super) anchors: &'a [Anchor],
    pub(super) address: Address,
    pub(super) state: &'a mut InstructionState,
    pub(super) holds: Vec<OperandHold>,
    pub(super) reservations: Vec<ActiveReservation>,
    pub(super) save_depth: usize,
    pub(super) max_save_depth: &'a mut usize,
    pub(super) ignore_variables: bool,
    /// Home register of the variable the instruction writes
    pub(super) destination_home: Option<RegisterId>,
    pub(super) flags_live: bool,
}

impl<'a> EmitContext<'a> {
    pub fn new(
        target: &'a dyn Target,
        function: &'a str,
        variables: &'a [Variable],
        anchors: &'a [Anchor],
        address: Address,
        state: &'a mut InstructionState,
        max_save_depth: &'a mut usize,
    ) -> Self {
        Self {
            target,
            function,
            variables,
            anchors,
            address,
            state,
            holds: Vec::new(),
            reservations: Vec::new(),
            save_depth: 0,
            max_save_depth,
            ignore_variables: false,
            destination_home: None,
            flags_live: false,
        }
    }

    /// Prepare for emitting `kind`: hold every register an operand lives in
    pub fn prepare(&mut self, kind: &dyn InstructionKind) {
        self.ignore_variables = kind.ignores_register_variables();
        let variables = self.variables;
        self.destination_home = kind
            .destination()
            .and_then(Operand::variable_id)
            .and_then(|variable| variables[variable.0].register());
        for (_, operand) in kind.operands() {
            self.hold_operand(operand);
        }
    }

    fn hold_operand(&mut self, operand: &Operand) {
        let hold = match operand {
            Operand::Variable { variable, .. } | Operand::Indirect { pointer: variable, .. } => {
                self.variables[variable.0]
                    .register()
                    .map(|register| OperandHold { register, variable: Some(*variable) })
            }
            Operand::Register { register, .. } => Some(OperandHold { register: *register, variable: None }),
            _ => None,
        };
        if let Some(hold) = hold {
            if !self.holds.contains(&hold) {
                self.holds.push(hold);
            }
        }
    }

    /// End of emission; every reservation must have been released
    pub fn finish(self) {
        if let Some(entry) = self.reservations.last() {
            panic!(
                "reservation of {} still active at end of instruction {}",
                self.catalog().name(entry.register),
                self.address
            );
        }
    }

    // ==================== Accessors ====================

    pub fn target(&self) -> &'a dyn Target {
        self.target
    }

    pub fn catalog(&self) -> &'a RegisterCatalog {
        self.target.registers()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn function_name(&self) -> &'a str {
        self.function
    }

    pub fn variable(&self, id: VariableId) -> &'a Variable {
        &self.variables[id.0]
    }

    pub fn anchor_label(&self, anchor: AnchorId) -> String {
        debug_assert!(self.anchors[anchor.0].is_placed(), "jump to unplaced anchor {}", anchor);
        labels::anchor_label(self.function, anchor)
    }

    pub fn exit_label(&self) -> String {
        labels::exit_label(self.function)
    }

    /// Emit one line of assembly
    pub fn emit(&mut self, line: impl Into<String>) {
        self.state.codes.push(line.into());
    }

    pub fn codes(&self) -> &[String] {
        &self.state.codes
    }

    /// Mark the condition flags as carrying a result; restores emitted
    /// while set must not disturb them
    pub fn set_flags_live(&mut self, live: bool) {
        self.flags_live = live;
    }

    pub fn flags_live(&self) -> bool {
        self.flags_live
    }

    // ==================== Register knowledge ====================

    pub fn content(&self, register: RegisterId) -> Option<&RegisterContent> {
        self.state.contents.get(&register)
    }

    pub fn is_constant_assigned(&self, register: RegisterId, value: i64) -> bool {
        self.content(register) == Some(&RegisterContent::Integer(value))
    }

    pub fn is_variable_assigned(&self, register: RegisterId, variable: VariableId, offset: usize) -> bool {
        self.content(register) == Some(&RegisterContent::Variable { variable, offset })
    }

    pub fn set_constant(&mut self, register: RegisterId, value: i64) {
        self.set_content(register, RegisterContent::Integer(value));
    }

    pub fn set_symbol(&mut self, register: RegisterId, label: impl Into<String>, offset: i64) {
        self.set_content(register, RegisterContent::Symbol { label: label.into(), offset });
    }

    pub fn set_variable(&mut self, register: RegisterId, variable: VariableId, offset: usize) {
        self.set_content(register, RegisterContent::Variable { variable, offset });
    }

    fn set_content(&mut self, register: RegisterId, content: RegisterContent) {
        self.remove_register(register);
        self.state.contents.insert(register, content);
    }

    /// Forget everything known about `register` and what overlaps it
    pub fn remove_register(&mut self, register: RegisterId) {
        let catalog = self.catalog();
        self.state
            .contents
            .retain(|&known, _| !catalog.conflicts(known, register));
    }

    /// Forget every register copy of `variable`
    pub fn invalidate_variable(&mut self, variable: VariableId) {
        self.state.contents.retain(|_, content| {
            !matches!(content, RegisterContent::Variable { variable: v, .. } if *v == variable)
        });
    }

    /// Forget register copies of every variable kept in memory. Used after
    /// a store through a pointer, which may alias any of them.
    pub fn invalidate_memory(&mut self) {
        let variables = self.variables;
        self.state.contents.retain(|_, content| match content {
            RegisterContent::Variable { variable, .. } => variables[variable.0].register().is_some(),
            _ => true,
        });
    }

    /// Record that the code just emitted writes `register`. A register whose
    /// previous contents are being preserved by a reservation is restored
    /// before the instruction ends and is not reported as changed.
    pub fn add_changed(&mut self, register: RegisterId) {
        if let Some(scratch) = self.active_scratch(register) {
            panic!(
                "{} written while holding a relocated value",
                self.catalog().name(scratch)
            );
        }
        self.remove_register(register);
        if self.is_relocated(register) {
            trace!(register = self.catalog().name(register), "write to relocated register");
            return;
        }
        self.state.changed.insert(register);
    }

    /// Record that every register is destroyed
    pub fn add_changed_all(&mut self) {
        let registers: Vec<RegisterId> = self.catalog().iter().map(|r| r.id).collect();
        for register in registers {
            self.add_changed(register);
        }
    }

    pub fn changed(&self) -> &BTreeSet<RegisterId> {
        &self.state.changed
    }

    /// The scratch register of a copy relocation that writing `register`
    /// would destroy. A scratch claimed again by a later reservation has
    /// been relocated in turn and may be written.
    fn active_scratch(&self, register: RegisterId) -> Option<RegisterId> {
        let catalog = self.catalog();
        self.reservations.iter().enumerate().find_map(|(index, entry)| match entry.relocation {
            Relocation::Copied { scratch }
                if catalog.conflicts(scratch, register)
                    && !self.reservations[index + 1..]
                        .iter()
                        .any(|later| catalog.conflicts(later.register, scratch)) =>
            {
                Some(scratch)
            }
            _ => None,
        })
    }

    fn is_relocated(&self, register: RegisterId) -> bool {
        let catalog = self.catalog();
        self.reservations.iter().any(|entry| {
            !matches!(entry.relocation, Relocation::None)
                && (entry.moved == register || catalog.get(entry.moved).contains(register))
        })
    }

    // ==================== Locations ====================

    /// The register variable whose value must survive this instruction in
    /// a register overlapping `register`
    pub fn register_variable_in_range(&self, register: RegisterId) -> Option<VariableId> {
        let catalog = self.catalog();
        self.variables
            .iter()
            .find(|variable| {
                variable
                    .register()
                    .is_some_and(|home| catalog.conflicts(home, register))
                    && variable.is_live_through(self.address)
            })
            .map(Variable::id)
    }

    /// Where byte `offset` of `variable` can be found right now, following
    /// any relocation made by an active reservation
    pub fn variable_location(&self, id: VariableId, offset: usize) -> Location {
        let variable = self.variable(id);
        match variable.storage() {
            Storage::Register(home) => self.register_location(*home, offset),
            Storage::Local(slot) => Location::Memory {
                label: labels::local_label(self.function, *slot),
                offset,
            },
            Storage::Static(label) => Location::Memory { label: label.clone(), offset },
            Storage::Constant(value) => Location::Constant(value >> (8 * offset)),
            Storage::Unassigned => panic!("variable {} used without storage", variable.name()),
        }
    }

    fn register_location(&self, home: RegisterId, offset: usize) -> Location {
        let catalog = self.catalog();
        let mut register = home;

        // relocations chain from the oldest reservation to the newest
        for entry in &self.reservations {
            if !catalog.conflicts(entry.moved, register) {
                continue;
            }
            match entry.relocation {
                Relocation::None => {}
                Relocation::Copied { scratch } => {
                    if entry.moved == register {
                        register = scratch;
                    } else if let Some(index) = catalog.get(entry.moved).parts.iter().position(|&p| p == register) {
                        register = catalog.byte_part(scratch, index).unwrap_or(scratch);
                    }
                }
                Relocation::Saved { slot } => {
                    if entry.moved == register || catalog.get(entry.moved).contains(register) {
                        return Location::Memory {
                            label: labels::save_label(slot),
                            offset: self.target.saved_offset(entry.moved, register) + offset,
                        };
                    }
                }
            }
        }

        if offset == 0 {
            return Location::Register(register);
        }
        match catalog.byte_part(register, offset) {
            Some(part) => Location::Register(part),
            None => panic!("byte {} of register {} is not addressable", offset, catalog.name(register)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{ToyTarget, A, B, BC, C};
    use crate::core::variable::{LocalSlotId, UsageKind};
    use crate::types::IrType;

    fn variables() -> Vec<Variable> {
        let mut x = Variable::new(VariableId(0), "x", IrType::byte(), false);
        x.add_usage(0, UsageKind::Write);
        x.set_register(B);
        let mut y = Variable::new(VariableId(1), "y", IrType::word(), false);
        y.add_usage(0, UsageKind::Write);
        y.set_local(LocalSlotId(2));
        let mut z = Variable::new(VariableId(2), "z", IrType::byte(), false);
        z.set_static("g");
        vec![x, y, z]
    }

    #[test]
    fn test_knowledge_updates() {
        let target = ToyTarget::new();
        let vars = variables();
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 0, &mut state, &mut depth);

        cx.set_constant(C, 5);
        cx.set_variable(A, VariableId(2), 0);
        assert!(cx.is_constant_assigned(C, 5));
        assert!(cx.is_variable_assigned(A, VariableId(2), 0));

        cx.add_changed(BC);
        assert_eq!(cx.content(C), None);
        assert!(cx.changed().contains(&BC));

        cx.invalidate_memory();
        assert_eq!(cx.content(A), None);
        cx.finish();
    }

    #[test]
    fn test_locations() {
        let target = ToyTarget::new();
        let vars = variables();
        let mut state = InstructionState::default();
        let mut depth = 0;
        let cx = EmitContext::new(&target, "f", &vars, &[], 0, &mut state, &mut depth);

        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(B));
        assert_eq!(
            cx.variable_location(VariableId(1), 1),
            Location::Memory { label: "f_l2".to_string(), offset: 1 }
        );
        assert_eq!(
            cx.variable_location(VariableId(2), 0),
            Location::Memory { label: "g".to_string(), offset: 0 }
        );
    }
}
