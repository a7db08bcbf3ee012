//! Scoped register reservations
//!
//! Instruction bodies borrow registers through [`EmitContext::reserve`].
//! Reserving a register whose contents are still needed relocates them,
//! into a free scratch register when the target can copy there and into a
//! save slot otherwise, and [`EmitContext::release`] puts them back.
//! Reservations nest strictly: the last one taken is the first released.

use tracing::trace;

use super::emit::EmitContext;
use super::instruction::RegisterContent;
use super::labels;
use super::operand::Operand;
use super::register::RegisterId;
use super::variable::VariableId;

/// Handle of an active reservation. It must be handed back to
/// [`EmitContext::release`] or [`EmitContext::discard`].
#[must_use = "a reservation must be released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    index: usize,
    register: RegisterId,
}

impl Reservation {
    pub fn register(&self) -> RegisterId {
        self.register
    }
}

/// A register some operand of the current instruction is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct OperandHold {
    pub register: RegisterId,
    pub variable: Option<VariableId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Relocation {
    None,
    Copied { scratch: RegisterId },
    Saved { slot: usize },
}

#[derive(Debug)]
pub(super) struct ActiveReservation {
    pub register: RegisterId,
    /// The register whose contents were moved away; covers `register`
    pub moved: RegisterId,
    pub relocation: Relocation,
    pub snapshot: Vec<(RegisterId, Option<RegisterContent>)>,
}

impl<'a> EmitContext<'a> {
    /// Claim `register` for the rest of the current scope. `operand` is the
    /// value about to be placed in it; its own register is not treated as
    /// occupied by it.
    pub fn reserve(&mut self, register: RegisterId, operand: Option<&Operand>) -> Reservation {
        let index = self.reservations.len();
        let entry = match self.occupant(register, operand) {
            None => ActiveReservation {
                register,
                moved: register,
                relocation: Relocation::None,
                snapshot: Vec::new(),
            },
            Some(moved) => self.relocate(register, moved),
        };
        self.reservations.push(entry);
        Reservation { index, register }
    }

    /// Give a reservation back, restoring whatever it relocated
    pub fn release(&mut self, reservation: Reservation) {
        let entry = self.pop_reservation(reservation);
        match entry.relocation {
            Relocation::None => return,
            Relocation::Copied { scratch } => {
                let target = self.target;
                target.copy_register(self, scratch, entry.moved);
                self.remove_register(scratch);
            }
            Relocation::Saved { slot } => {
                let target = self.target;
                target.restore_register(self, entry.moved, &labels::save_label(slot));
                self.save_depth -= 1;
            }
        }

        let catalog = self.catalog();
        self.state
            .contents
            .retain(|&known, _| !catalog.get(known).contains(entry.moved));
        for (register, content) in entry.snapshot {
            match content {
                Some(content) => self.state.contents.insert(register, content),
                None => self.state.contents.remove(&register),
            };
        }
        trace!(register = catalog.name(entry.register), "reservation restored");
    }

    /// Drop a reservation without restoring what it relocated. Only valid
    /// when the instruction destroys the relocated value anyway.
    pub fn discard(&mut self, reservation: Reservation) {
        let entry = self.pop_reservation(reservation);
        if let Relocation::Saved { .. } = entry.relocation {
            self.save_depth -= 1;
        }
        if let Relocation::Copied { scratch } = entry.relocation {
            self.remove_register(scratch);
        }
        self.remove_register(entry.moved);
    }

    /// Run `body` with `register` reserved
    pub fn with_register<R>(
        &mut self,
        register: RegisterId,
        operand: Option<&Operand>,
        body: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let reservation = self.reserve(register, operand);
        let result = body(self);
        self.release(reservation);
        result
    }

    /// Stop protecting the register `operand` is read from; its value may
    /// now be overwritten in place
    pub fn cancel_operand_register(&mut self, operand: &Operand) {
        match operand {
            Operand::Register { register, .. } => self
                .holds
                .retain(|hold| !(hold.variable.is_none() && hold.register == *register)),
            other => {
                if let Some(variable) = other.referenced_variable() {
                    self.holds.retain(|hold| hold.variable != Some(variable));
                }
            }
        }
    }

    /// Let the register of `destination` be overwritten before the sources
    /// are consumed, unless one of them reads the same variable
    pub fn cancel_destination_register(&mut self, destination: &Operand, sources: &[&Operand]) {
        let Some(variable) = destination.variable_id() else {
            return;
        };
        if !sources.iter().any(|source| source.referenced_variable() == Some(variable)) {
            self.cancel_operand_register(destination);
        }
    }

    /// Stop protecting the register `consumed` was read from once its value
    /// sits in a working register, unless a `pending` operand still reads
    /// the same variable or `destination` is addressed through it
    pub fn consume_operand(&mut self, consumed: &Operand, pending: &[&Operand], destination: Option<&Operand>) {
        let Some(variable) = consumed.referenced_variable() else {
            return;
        };
        let read_again = pending.iter().any(|operand| operand.referenced_variable() == Some(variable));
        let addressing = matches!(destination, Some(Operand::Indirect { pointer, .. }) if *pointer == variable);
        if !read_again && !addressing {
            self.cancel_operand_register(consumed);
        }
    }

    fn pop_reservation(&mut self, reservation: Reservation) -> ActiveReservation {
        match self.reservations.pop() {
            Some(entry) if self.reservations.len() == reservation.index => entry,
            _ => panic!(
                "reservation of {} released out of order",
                self.catalog().name(reservation.register)
            ),
        }
    }

    /// The widest register whose contents must survive if `register` is
    /// overwritten, or `None` when it is free
    pub(super) fn occupant(&self, register: RegisterId, operand: Option<&Operand>) -> Option<RegisterId> {
        let catalog = self.catalog();
        let associated = operand.and_then(Operand::referenced_variable);
        let associated_register = match operand {
            Some(Operand::Register { register, .. }) => Some(*register),
            _ => None,
        };

        let mut occupied: Vec<RegisterId> = Vec::new();

        for entry in &self.reservations {
            occupied.push(entry.register);
            if let Relocation::Copied { scratch } = entry.relocation {
                occupied.push(scratch);
            }
        }

        for hold in &self.holds {
            let own = match hold.variable {
                Some(variable) => associated == Some(variable),
                None => associated_register == Some(hold.register),
            };
            if !own {
                occupied.push(hold.register);
            }
        }

        if !self.ignore_variables {
            if let Some(home) = self
                .register_variable_in_range(register)
                .and_then(|variable| self.variables[variable.0].register())
            {
                occupied.push(home);
            }
        }

        occupied
            .into_iter()
            .filter(|&other| catalog.conflicts(other, register))
            .fold(None, |widest: Option<RegisterId>, other| {
                let current = widest.unwrap_or(register);
                if catalog.get(other).contains(current) {
                    Some(other)
                } else {
                    Some(current)
                }
            })
    }

    /// Whether `register` may receive a relocated value. The home of the
    /// destination is excluded: the instruction stores its result there.
    fn is_scratch_free(&self, register: RegisterId) -> bool {
        let catalog = self.catalog();
        let claimed = self.reservations.iter().any(|entry| {
            catalog.conflicts(entry.register, register)
                || matches!(entry.relocation, Relocation::Copied { scratch } if catalog.conflicts(scratch, register))
        });
        let held = self.holds.iter().any(|hold| catalog.conflicts(hold.register, register));
        let written = self
            .destination_home
            .is_some_and(|home| catalog.conflicts(home, register));
        !(claimed || held || written || self.register_variable_in_range(register).is_some())
    }

    fn relocate(&mut self, register: RegisterId, moved: RegisterId) -> ActiveReservation {
        let catalog = self.catalog();
        let target = self.target;

        let scratch = target
            .copy_candidates(moved)
            .into_iter()
            .find(|&candidate| {
                !catalog.conflicts(candidate, moved) && self.is_scratch_free(candidate)
            });

        if let Some(scratch) = scratch {
            let snapshot = self.snapshot(moved);
            target.copy_register(self, moved, scratch);
            self.add_changed(scratch);
            for (index, (_, content)) in snapshot.iter().enumerate() {
                if let (Some(content), Some(&part)) = (content, catalog.covered(scratch).get(index)) {
                    self.state.contents.insert(part, content.clone());
                }
            }
            trace!(
                register = catalog.name(register),
                from = catalog.name(moved),
                to = catalog.name(scratch),
                "reservation relocated by copy"
            );
            return ActiveReservation {
                register,
                moved,
                relocation: Relocation::Copied { scratch },
                snapshot,
            };
        }

        let unit = target.save_unit(moved);
        let snapshot = self.snapshot(unit);
        let slot = self.save_depth;
        self.save_depth += 1;
        *self.max_save_depth = (*self.max_save_depth).max(self.save_depth);
        target.save_register(self, unit, &labels::save_label(slot));
        trace!(
            register = catalog.name(register),
            unit = catalog.name(unit),
            slot,
            "reservation relocated to save slot"
        );
        ActiveReservation {
            register,
            moved: unit,
            relocation: Relocation::Saved { slot },
            snapshot,
        }
    }

    fn snapshot(&self, register: RegisterId) -> Vec<(RegisterId, Option<RegisterContent>)> {
        self.catalog()
            .covered(register)
            .into_iter()
            .map(|covered| (covered, self.state.contents.get(&covered).cloned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::emit::Location;
    use crate::core::instruction::{InstructionState, RegisterContents};
    use crate::core::testing::{ToyTarget, A, B, BC, C, D};
    use crate::core::variable::{UsageKind, Variable};
    use crate::ir::Assign;
    use crate::types::IrType;
    use pretty_assertions::assert_eq;

    /// A byte variable in `register`, written at 0 and read at 5
    fn live(id: usize, register: RegisterId) -> Variable {
        let mut variable = Variable::new(VariableId(id), format!("v{}", id), IrType::byte(), false);
        variable.add_usage(0, UsageKind::Write);
        variable.add_usage(5, UsageKind::Read);
        variable.set_register(register);
        variable.compute_live_spans(|_| false);
        variable
    }

    #[test]
    fn test_free_register_needs_no_relocation() {
        let target = ToyTarget::new();
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &[], &[], 2, &mut state, &mut depth);

        cx.with_register(A, None, |cx| {
            cx.emit("ld a,#1");
            cx.add_changed(A);
        });
        assert_eq!(cx.codes(), &["ld a,#1".to_string()]);
        assert!(cx.changed().contains(&A));
        cx.finish();
    }

    #[test]
    fn test_live_variable_is_copied_out_and_back() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let reservation = cx.reserve(B, None);
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(A));
        cx.emit("ld b,#1");
        cx.add_changed(B);
        cx.release(reservation);

        assert_eq!(
            cx.codes(),
            &["mov a,b".to_string(), "ld b,#1".to_string(), "mov b,a".to_string()]
        );
        assert_eq!(vars[0].register(), Some(B));
        assert!(!cx.changed().contains(&B));
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(B));
        cx.finish();
    }

    #[test]
    fn test_chained_relocation_follows_value() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let outer = cx.reserve(B, None);
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(A));
        let inner = cx.reserve(A, None);
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(C));
        cx.release(inner);
        cx.release(outer);

        assert_eq!(
            cx.codes(),
            &[
                "mov a,b".to_string(),
                "mov c,a".to_string(),
                "mov a,c".to_string(),
                "mov b,a".to_string(),
            ]
        );
        cx.finish();
    }

    #[test]
    fn test_release_restores_knowledge() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B), live(1, C)];
        let mut state = InstructionState::default();
        state.contents.insert(B, RegisterContent::Variable { variable: VariableId(0), offset: 0 });
        state.contents.insert(C, RegisterContent::Variable { variable: VariableId(1), offset: 0 });
        let before: RegisterContents = state.contents.clone();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let outer = cx.reserve(B, None);
        cx.set_constant(B, 7);
        let inner = cx.reserve(C, None);
        cx.set_constant(C, 9);
        cx.release(inner);
        cx.release(outer);
        cx.finish();

        assert_eq!(state.contents, before);
    }

    #[test]
    fn test_falls_back_to_save_slot() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B), live(1, C), live(2, D)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let accumulator = cx.reserve(A, None);
        let reservation = cx.reserve(B, None);
        assert_eq!(
            cx.variable_location(VariableId(0), 0),
            Location::Memory { label: "__save0".to_string(), offset: 1 }
        );
        cx.emit("ld b,#1");
        cx.add_changed(B);
        cx.release(reservation);
        cx.release(accumulator);
        cx.finish();

        assert_eq!(
            state.codes,
            vec!["st bc,__save0".to_string(), "ld b,#1".to_string(), "ld bc,__save0".to_string()]
        );
        assert_eq!(depth, 1);
        assert!(state.changed.is_empty());
    }

    #[test]
    fn test_restore_preserves_flags_when_live() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B), live(1, C), live(2, D)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let accumulator = cx.reserve(A, None);
        let reservation = cx.reserve(C, None);
        cx.set_flags_live(true);
        cx.release(reservation);
        cx.release(accumulator);
        cx.finish();

        assert_eq!(
            state.codes,
            vec!["st bc,__save0".to_string(), "pushf".to_string(), "ld bc,__save0".to_string(), "popf".to_string()]
        );
    }

    #[test]
    fn test_operand_hold_relocates_other_source() {
        let target = ToyTarget::new();
        // x in B is read by this instruction for the last time
        let mut x = Variable::new(VariableId(0), "x", IrType::byte(), false);
        x.add_usage(0, UsageKind::Write);
        x.add_usage(2, UsageKind::Read);
        x.set_register(B);
        x.compute_live_spans(|_| false);
        let vars = vec![x];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);
        let operand = Operand::variable(IrType::byte(), VariableId(0));
        cx.prepare(&Assign::new(Operand::register(IrType::byte(), A), operand.clone()));

        // loading x into its own register needs no relocation
        assert_eq!(cx.occupant(B, Some(&operand)), None);
        // anything else must preserve it
        assert_eq!(cx.occupant(B, None), Some(B));
        cx.cancel_operand_register(&operand);
        assert_eq!(cx.occupant(B, None), None);
        cx.finish();
    }

    #[test]
    fn test_destination_register_freed_unless_read() {
        let target = ToyTarget::new();
        let mut x = Variable::new(VariableId(0), "x", IrType::byte(), false);
        x.add_usage(2, UsageKind::Write);
        x.add_usage(4, UsageKind::Read);
        x.set_register(B);
        x.compute_live_spans(|_| false);
        let vars = vec![x];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);
        let destination = Operand::variable(IrType::byte(), VariableId(0));
        let source = Operand::integer(IrType::byte(), 1);
        cx.prepare(&Assign::new(destination.clone(), source.clone()));

        cx.cancel_destination_register(&destination, &[&destination]);
        assert_eq!(cx.occupant(B, None), Some(B));
        cx.cancel_destination_register(&destination, &[&source]);
        assert_eq!(cx.occupant(B, None), None);
        cx.finish();
    }

    #[test]
    fn test_consumed_operand_keeps_addressing_pointer() {
        let target = ToyTarget::new();
        let mut p = Variable::new(VariableId(0), "p", IrType::ptr(IrType::byte()), false);
        p.add_usage(2, UsageKind::Read);
        p.set_register(BC);
        p.compute_live_spans(|_| false);
        let vars = vec![p];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);
        let through = Operand::indirect(IrType::byte(), VariableId(0), 0);
        let one = Operand::integer(IrType::byte(), 1);
        cx.prepare(&Assign::new(through.clone(), through.clone()));

        cx.consume_operand(&through, &[&one], Some(&through));
        assert_eq!(cx.occupant(BC, None), Some(BC));
        cx.consume_operand(&through, &[&one], None);
        assert_eq!(cx.occupant(BC, None), None);
        cx.finish();
    }

    #[test]
    fn test_destination_home_is_never_scratch() {
        let target = ToyTarget::new();
        // x in A is written here and read later; A would be the first copy candidate for B
        let mut x = Variable::new(VariableId(1), "x", IrType::byte(), false);
        x.add_usage(2, UsageKind::Write);
        x.add_usage(4, UsageKind::Read);
        x.set_register(A);
        x.compute_live_spans(|_| false);
        let vars = vec![live(0, B), x];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);
        let destination = Operand::variable(IrType::byte(), VariableId(1));
        let source = Operand::integer(IrType::byte(), 1);
        cx.prepare(&Assign::new(destination.clone(), source.clone()));
        cx.cancel_destination_register(&destination, &[&source]);

        let reservation = cx.reserve(B, None);
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(C));
        cx.emit("ld b,#1");
        cx.add_changed(B);
        cx.emit("st b,a");
        cx.add_changed(A);
        cx.release(reservation);
        cx.finish();

        assert_eq!(
            state.codes,
            vec!["mov c,b".to_string(), "ld b,#1".to_string(), "st b,a".to_string(), "mov b,c".to_string()]
        );
    }

    #[test]
    #[should_panic(expected = "written while holding a relocated value")]
    fn test_write_to_scratch_panics() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let _reservation = cx.reserve(B, None);
        assert_eq!(cx.variable_location(VariableId(0), 0), Location::Register(A));
        cx.add_changed(A);
    }

    #[test]
    fn test_scratch_claimed_again_may_be_written() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let outer = cx.reserve(B, None);
        let inner = cx.reserve(A, None);
        cx.emit("ld a,#1");
        cx.add_changed(A);
        cx.release(inner);
        cx.release(outer);
        cx.finish();

        assert_eq!(
            state.codes,
            vec![
                "mov a,b".to_string(),
                "mov c,a".to_string(),
                "ld a,#1".to_string(),
                "mov a,c".to_string(),
                "mov b,a".to_string(),
            ]
        );
    }

    #[test]
    fn test_variables_ignored_when_instruction_clobbers_all() {
        let target = ToyTarget::new();
        let vars = vec![live(0, B)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);
        cx.ignore_variables = true;

        let reservation = cx.reserve(B, None);
        cx.discard(reservation);
        assert!(cx.codes().is_empty());
        cx.finish();
    }

    #[test]
    fn test_word_reservation_moves_both_halves() {
        let target = ToyTarget::new();
        let vars = vec![live(0, C)];
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &vars, &[], 2, &mut state, &mut depth);

        let reservation = cx.reserve(BC, None);
        assert_eq!(
            cx.variable_location(VariableId(0), 0),
            Location::Memory { label: "__save0".to_string(), offset: 0 }
        );
        cx.release(reservation);
        cx.finish();
    }

    #[test]
    #[should_panic(expected = "released out of order")]
    fn test_release_out_of_order_panics() {
        let target = ToyTarget::new();
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &[], &[], 0, &mut state, &mut depth);
        let first = cx.reserve(A, None);
        let second = cx.reserve(C, None);
        cx.release(first);
        cx.release(second);
    }

    #[test]
    #[should_panic(expected = "still active")]
    fn test_unreleased_reservation_panics() {
        let target = ToyTarget::new();
        let mut state = InstructionState::default();
        let mut depth = 0;
        let mut cx = EmitContext::new(&target, "f", &[], &[], 0, &mut state, &mut depth);
        let _held = cx.reserve(A, None);
        cx.finish();
    }
}
