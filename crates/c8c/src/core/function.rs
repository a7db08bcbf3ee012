//! Functions and the allocation pipeline
//!
//! A `Function` is filled by the builder, then `compile` runs, in order:
//! control-flow reconstruction, intersection analysis, anchor tests,
//! the target's register allocation, local slot allocation, assembly
//! building and save interval computation.

use std::fmt;

use tracing::debug;

use super::allocation;
use super::anchor::{Anchor, AnchorId};
use super::emit::EmitContext;
use super::instruction::{Instruction, InstructionKind, InstructionState, RegisterContent, RegisterContents};
use super::labels;
use super::operand::Operand;
use super::register::{RegisterCatalog, RegisterId};
use super::savings;
use super::target::Target;
use super::variable::{make_intersection, Address, LocalSlotId, Storage, UsageKind, Variable, VariableId};
use crate::ir::Assign;
use crate::types::IrType;

/// A parameter and the register the caller passes it in, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub variable: VariableId,
    pub register: Option<RegisterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    pub id: LocalSlotId,
    pub size: usize,
}

#[derive(Debug)]
pub struct Function {
    name: String,
    return_type: IrType,
    parameters: Vec<Parameter>,
    variables: Vec<Variable>,
    instructions: Vec<Instruction>,
    anchors: Vec<Anchor>,
    temporary_count: usize,
    slots: Vec<LocalSlot>,
    prologue: Vec<String>,
    max_save_depth: usize,
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: IrType) -> Self {
        Self {
            name: name.into(),
            return_type,
            parameters: Vec::new(),
            variables: Vec::new(),
            instructions: Vec::new(),
            anchors: Vec::new(),
            temporary_count: 0,
            slots: Vec::new(),
            prologue: Vec::new(),
            max_save_depth: 0,
        }
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &IrType {
        &self.return_type
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut [Variable] {
        &mut self.variables
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id.0]
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, address: Address) -> &Instruction {
        &self.instructions[address]
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn anchor(&self, id: AnchorId) -> &Anchor {
        &self.anchors[id.0]
    }

    pub fn anchor_mut(&mut self, id: AnchorId) -> &mut Anchor {
        &mut self.anchors[id.0]
    }

    pub fn slots(&self) -> &[LocalSlot] {
        &self.slots
    }

    pub fn prologue(&self) -> &[String] {
        &self.prologue
    }

    /// Deepest reservation save slot used by any instruction
    pub fn max_save_depth(&self) -> usize {
        self.max_save_depth
    }

    // ==================== Construction ====================

    pub fn add_variable(&mut self, name: impl Into<String>, ty: IrType) -> VariableId {
        let id = VariableId(self.variables.len());
        self.variables.push(Variable::new(id, name, ty, false));
        id
    }

    pub fn add_temporary(&mut self, ty: IrType) -> VariableId {
        let id = VariableId(self.variables.len());
        let name = format!("__t{}", self.temporary_count);
        self.temporary_count += 1;
        self.variables.push(Variable::new(id, name, ty, true));
        id
    }

    /// Import a module-level variable
    pub fn add_global(&mut self, name: impl Into<String>, ty: IrType) -> VariableId {
        let id = VariableId(self.variables.len());
        self.variables.push(Variable::global(id, name, ty));
        id
    }

    /// Bind `variable` as the next parameter, passed in `register` or, when
    /// `None`, in the function's parameter memory. The value exists on entry.
    pub fn add_parameter(&mut self, variable: VariableId, register: Option<RegisterId>) {
        let index = self.parameters.len();
        let label = labels::parameter_label(&self.name, index);
        let target = &mut self.variables[variable.0];
        match register {
            Some(register) => target.set_register(register),
            None => target.set_static(label),
        }
        target.add_usage(0, UsageKind::Read);
        self.parameters.push(Parameter { variable, register });
    }

    pub fn create_anchor(&mut self) -> AnchorId {
        let id = AnchorId(self.anchors.len());
        self.anchors.push(Anchor::new(id));
        id
    }

    /// Append an instruction; returns its address
    pub fn push_instruction(&mut self, kind: Box<dyn InstructionKind>) -> Address {
        let address = self.instructions.len();
        self.instructions.push(Instruction::new(address, kind));
        address
    }

    pub fn next_address(&self) -> Address {
        self.instructions.len()
    }

    // ==================== Pipeline ====================

    /// Run every pass; afterwards each instruction carries its code
    pub fn compile(&mut self, target: &dyn Target) {
        debug!(
            function = %self.name,
            instructions = self.instructions.len(),
            variables = self.variables.len(),
            "compiling function"
        );
        self.fill_flow();
        self.make_intersections();
        self.test_anchors();
        target.allocate_registers(self);
        allocation::allocate_local_slots(self);
        self.fill_live_spans();
        self.build_assembly(target);
        savings::fill_savings(self, target.registers());
    }

    /// Rebuild predecessor links from fall-through and anchors
    pub fn fill_flow(&mut self) {
        for instruction in &mut self.instructions {
            instruction.clear_previous();
        }
        for address in 1..self.instructions.len() {
            if !self.instructions[address - 1].kind().is_unconditional_jump() {
                self.instructions[address].add_previous(address - 1);
            }
        }
        for anchor in &self.anchors {
            let Some(address) = anchor.address() else {
                continue;
            };
            assert!(
                address < self.instructions.len(),
                "anchor {} placed past the last instruction", anchor.id()
            );
            for &origin in anchor.origins() {
                self.instructions[address].add_previous(origin);
            }
        }
    }

    /// Variables taking part in register and slot allocation
    pub fn allocation_candidates(&self) -> Vec<VariableId> {
        self.variables
            .iter()
            .filter(|v| {
                v.has_usages()
                    && v.ty().is_parameterizable()
                    && !matches!(v.storage(), Storage::Static(_) | Storage::Constant(_))
            })
            .map(Variable::id)
            .collect()
    }

    pub fn make_intersections(&mut self) {
        let candidates = self.allocation_candidates();
        let mut edges = 0;
        for (index, &a) in candidates.iter().enumerate() {
            for &b in &candidates[index + 1..] {
                if make_intersection(&mut self.variables, a, b) {
                    edges += 1;
                }
            }
        }
        debug!(function = %self.name, candidates = candidates.len(), edges, "intersections");
    }

    pub fn test_anchors(&mut self) {
        let Function { name, variables, anchors, .. } = self;
        let mut demoted = 0;
        for variable in variables.iter_mut() {
            let eligible = variable.has_usages()
                && variable.ty().is_parameterizable()
                && !matches!(variable.storage(), Storage::Static(_) | Storage::Constant(_));
            if eligible && variable.test_anchors(anchors, |n| labels::static_label(name, n)) {
                debug!(function = %name, variable = variable.name(), "demoted to static");
                demoted += 1;
            }
        }
        debug!(function = %self.name, demoted, "anchor tests");
    }

    /// Sum of the per-instruction scores of keeping `variable` in
    /// `register` over its live range; `None` if any instruction vetoes it
    pub fn register_adaptability(&self, variable: VariableId, register: RegisterId, target: &dyn Target) -> Option<i32> {
        let v = &self.variables[variable.0];
        let (Some(first), Some(last)) = (v.first_address(), v.last_address()) else {
            panic!("adaptability requested for unused variable {}", v.name());
        };
        let mut total = 0;
        for instruction in &self.instructions[first..=last] {
            total += instruction.kind().register_adaptability(v, register, target)?;
        }
        Some(total)
    }

    pub(super) fn add_slot(&mut self, size: usize) -> LocalSlotId {
        let id = LocalSlotId(self.slots.len());
        self.slots.push(LocalSlot { id, size });
        id
    }

    pub fn fill_live_spans(&mut self) {
        let jumps: Vec<bool> = self
            .instructions
            .iter()
            .map(|instruction| instruction.kind().is_unconditional_jump())
            .collect();
        for variable in &mut self.variables {
            variable.compute_live_spans(|address| jumps.get(address).copied().unwrap_or(false));
        }
    }

    /// Emit the code of every instruction in address order
    pub fn build_assembly(&mut self, target: &dyn Target) {
        self.build_prologue(target);

        let Function { name, variables, instructions, anchors, max_save_depth, .. } = self;
        let catalog = target.registers();
        for address in 0..instructions.len() {
            let contents = build_result_variables(instructions, variables, catalog, address);
            let (kind, state) = instructions[address].begin(contents);
            let mut cx = EmitContext::new(
                target,
                name.as_str(),
                &*variables,
                &*anchors,
                address,
                state,
                &mut *max_save_depth,
            );
            cx.prepare(kind);
            kind.build_assembly(&mut cx);
            cx.finish();
            instructions[address].mark_built();
        }
    }

    /// Store register parameters that ended up in memory
    fn build_prologue(&mut self, target: &dyn Target) {
        let mut state = InstructionState::default();
        for parameter in &self.parameters {
            let Some(register) = parameter.register else {
                continue;
            };
            let variable = &self.variables[parameter.variable.0];
            if variable.register() == Some(register) {
                continue;
            }
            let ty = variable.ty().clone();
            let store = Assign::new(
                Operand::variable(ty.clone(), parameter.variable),
                Operand::register(ty, register),
            );
            let mut cx = EmitContext::new(
                target,
                &self.name,
                &self.variables,
                &self.anchors,
                0,
                &mut state,
                &mut self.max_save_depth,
            );
            cx.prepare(&store);
            store.build_assembly(&mut cx);
            cx.finish();
        }
        self.prologue = state.codes;
    }

    pub(super) fn split_mut(&mut self) -> (&[Variable], &mut [Instruction]) {
        (&self.variables, &mut self.instructions)
    }

    /// One line per variable with its final storage
    pub fn allocation_report(&self, catalog: &RegisterCatalog) -> String {
        let mut report = String::new();
        report.push_str(&format!("function {}:\n", self.name));
        for variable in &self.variables {
            let storage = match variable.storage() {
                Storage::Unassigned => "unused".to_string(),
                Storage::Register(register) => format!("register {}", catalog.name(*register)),
                Storage::Local(slot) => format!("local {}", labels::local_label(&self.name, *slot)),
                Storage::Static(label) => format!("static {}", label),
                Storage::Constant(value) => format!("constant {}", value),
            };
            report.push_str(&format!(
                "  {} {}: {} -> {}\n",
                variable.id(),
                variable.name(),
                variable.ty(),
                storage
            ));
        }
        report
    }
}

/// Knowledge an instruction starts with: the facts every predecessor
/// agrees on, minus those about registers a live variable occupies
pub fn build_result_variables(
    instructions: &[Instruction],
    variables: &[Variable],
    catalog: &RegisterCatalog,
    address: Address,
) -> RegisterContents {
    let previous = instructions[address].previous();
    let Some(&first) = previous.iter().next() else {
        return RegisterContents::new();
    };
    if previous.iter().any(|&p| !instructions[p].is_built()) {
        return RegisterContents::new();
    }

    let mut merged = instructions[first].contents().clone();
    for &p in previous.iter().skip(1) {
        let other = instructions[p].contents();
        merged.retain(|register, content| other.get(register) == Some(content));
    }

    merged.retain(|&register, content| {
        !variables.iter().any(|variable| {
            let owns = matches!(content, RegisterContent::Variable { variable: v, .. } if *v == variable.id());
            !owns
                && variable.is_in_range(address)
                && variable
                    .register()
                    .is_some_and(|home| catalog.conflicts(home, register))
        })
    });
    merged
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (i, parameter) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let variable = self.variable(parameter.variable);
            write!(f, "{} {}: {}", variable.id(), variable.name(), variable.ty())?;
        }
        writeln!(f, ") -> {}:", self.return_type)?;

        for variable in &self.variables {
            if !self.parameters.iter().any(|p| p.variable == variable.id()) {
                writeln!(f, "  var {} {}: {}", variable.id(), variable.name(), variable.ty())?;
            }
        }
        for instruction in &self.instructions {
            for anchor in &self.anchors {
                if anchor.address() == Some(instruction.address()) {
                    writeln!(f, "{}:", anchor.id())?;
                }
            }
            writeln!(f, "  {}", instruction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{ToyTarget, A, B, D};
    use crate::ir::{Empty, FunctionBuilder, Relation};
    use pretty_assertions::assert_eq;

    fn byte(value: i64) -> Operand {
        Operand::integer(IrType::byte(), value)
    }

    /// A function of `count` empty instructions with hand-made usages
    fn raw(count: usize, usages: &[&[(Address, UsageKind)]]) -> Function {
        let mut f = Function::new("raw", IrType::void());
        for _ in 0..count {
            f.push_instruction(Box::new(Empty));
        }
        for (index, list) in usages.iter().enumerate() {
            let id = f.add_variable(format!("v{}", index), IrType::byte());
            for &(address, kind) in *list {
                f.variable_mut(id).add_usage(address, kind);
            }
        }
        f
    }

    #[test]
    fn test_fill_flow_links_fallthrough_and_origins() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let x = b.local("x", IrType::byte());
        let l = b.create_anchor();
        let m = b.create_anchor();
        b.assign(b.operand(x), byte(1));
        b.branch(Relation::Eq, b.operand(x), byte(0), l);
        b.jump(m);
        b.place_anchor(l);
        b.assign(b.operand(x), byte(2));
        b.place_anchor(m);
        b.ret(None);
        let mut f = b.finish();
        f.fill_flow();

        let previous = |a: Address| f.instruction(a).previous().iter().copied().collect::<Vec<_>>();
        assert_eq!(previous(0), Vec::<Address>::new());
        assert_eq!(previous(1), vec![0]);
        assert_eq!(previous(2), vec![1]);
        assert_eq!(previous(3), vec![1]);
        assert_eq!(previous(4), vec![2, 3]);
    }

    #[test]
    fn test_straight_line_variable_gets_register() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::byte(), &target);
        let x = b.local("x", IrType::byte());
        let g = b.global("g", IrType::byte());
        b.assign(b.operand(g), b.operand(x));
        b.assign(b.operand(x), byte(3));
        b.ret(Some(b.operand(g)));
        let mut f = b.finish();
        f.compile(&target);

        assert!(f.variable(x).intersections().is_empty());
        assert!(matches!(f.variable(x).storage(), Storage::Register(_)));
        assert!(f.slots().is_empty());
    }

    #[test]
    fn test_disjoint_ranges_share_register() {
        let target = ToyTarget::new();
        let w = UsageKind::Write;
        let r = UsageKind::Read;
        let mut f = raw(21, &[
            &[(0, w), (5, r)],
            &[(10, w), (15, r)],
            &[(0, w), (10, r)],
            &[(5, w), (20, r)],
        ]);
        f.make_intersections();
        allocation::allocate_greedy(&mut f, &target);

        let reg = |i: usize| f.variable(VariableId(i)).register();
        assert!(!f.variable(VariableId(0)).intersects(VariableId(1)));
        assert!(f.variable(VariableId(2)).intersects(VariableId(3)));
        assert!(f.variable(VariableId(3)).intersects(VariableId(2)));
        assert_eq!(reg(0), Some(B));
        assert_eq!(reg(1), Some(B));
        assert!(reg(2).is_some() && reg(3).is_some());
        assert_ne!(reg(2), reg(3));
    }

    #[test]
    fn test_intersecting_variables_never_share_register() {
        let target = ToyTarget::new();
        let w = UsageKind::Write;
        let r = UsageKind::Read;
        let mut f = raw(10, &[
            &[(0, w), (9, r)],
            &[(1, w), (8, r)],
            &[(2, w), (7, r)],
            &[(3, w), (6, r)],
            &[(4, w), (5, r)],
        ]);
        f.make_intersections();
        allocation::allocate_greedy(&mut f, &target);
        allocation::allocate_local_slots(&mut f);

        let catalog = target.registers();
        for a in f.variables() {
            for &other in a.intersections() {
                if let (Some(ra), Some(rb)) = (a.register(), f.variable(other).register()) {
                    assert!(!catalog.conflicts(ra, rb));
                }
            }
        }
        // three byte registers, five overlapping variables
        assert_eq!(f.variables().iter().filter(|v| v.register().is_some()).count(), 3);
        assert_eq!(f.slots().len(), 2);
    }

    #[test]
    fn test_back_edge_from_outside_forces_static() {
        // loop top at 2, back edge from 6; the variable's recorded range
        // (1..4) ends inside the loop
        let target = ToyTarget::new();
        let mut f = raw(7, &[&[(1, UsageKind::Write), (4, UsageKind::Read)]]);
        let top = f.create_anchor();
        f.anchor_mut(top).add_origin(6);
        f.anchor_mut(top).set_address(2);
        f.fill_flow();
        f.make_intersections();
        f.test_anchors();
        target.allocate_registers(&mut f);
        allocation::allocate_local_slots(&mut f);

        assert_eq!(f.variable(VariableId(0)).storage(), &Storage::Static("raw_v0".to_string()));
        assert!(f.slots().is_empty());
    }

    #[test]
    fn test_jump_into_range_forces_static() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::byte(), &target);
        let p = b.parameter("p", IrType::byte());
        let y = b.local("y", IrType::byte());
        let q = b.local("q", IrType::byte());
        let skip = b.create_anchor();
        b.branch(Relation::Eq, b.operand(p), byte(0), skip);
        b.assign(b.operand(y), byte(2));
        b.assign(b.operand(q), byte(1));
        b.place_anchor(skip);
        b.binomial(crate::ir::BinOp::Add, b.operand(q), b.operand(q), byte(1));
        b.ret(Some(b.operand(y)));
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(f.variable(y).storage(), &Storage::Static("f_y".to_string()));
        // the anchor sits on q's last usage, not inside its range
        assert!(!f.variable(q).is_static());
        assert_eq!(f.variable(p).register(), Some(D));
    }

    #[test]
    fn test_call_destination_veto_falls_back_to_slot() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::byte(), &target);
        let x = b.local("x", IrType::byte());
        b.call("g", Vec::new(), Some(b.operand(x)));
        b.ret(Some(b.operand(x)));
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(f.register_adaptability(x, B, &target), None);
        assert_eq!(f.variable(x).local_slot(), Some(LocalSlotId(0)));
    }

    #[test]
    #[should_panic(expected = "unused variable")]
    fn test_adaptability_of_unused_variable_panics() {
        let target = ToyTarget::new();
        let mut f = raw(1, &[&[]]);
        f.fill_flow();
        f.register_adaptability(VariableId(0), B, &target);
    }

    #[test]
    fn test_allocation_report_lists_every_storage() {
        let target = ToyTarget::new();
        let mut f = raw(1, &[&[], &[], &[], &[], &[]]);
        f.variable_mut(VariableId(0)).set_register(B);
        f.variable_mut(VariableId(1)).set_local(LocalSlotId(0));
        f.variable_mut(VariableId(2)).set_static("raw_s");
        f.variable_mut(VariableId(3)).set_constant(7);

        assert_eq!(
            f.allocation_report(target.registers()),
            "function raw:\n\
             \x20 %0 v0: byte -> register b\n\
             \x20 %1 v1: byte -> local raw_l0\n\
             \x20 %2 v2: byte -> static raw_s\n\
             \x20 %3 v3: byte -> constant 7\n\
             \x20 %4 v4: byte -> unused\n"
        );
    }

    #[test]
    fn test_local_slots_are_reused() {
        let w = UsageKind::Write;
        let r = UsageKind::Read;
        let mut f = raw(6, &[&[(0, w), (2, r)], &[(3, w), (5, r)], &[(1, w), (4, r)]]);
        let word = f.add_variable("wide", IrType::word());
        f.variable_mut(word).add_usage(0, w);
        f.variable_mut(word).add_usage(5, r);
        f.make_intersections();
        allocation::allocate_local_slots(&mut f);

        let slot = |i: usize| f.variable(VariableId(i)).local_slot();
        assert_eq!(slot(0), Some(LocalSlotId(0)));
        assert_eq!(slot(1), Some(LocalSlotId(0)));
        assert_eq!(slot(2), Some(LocalSlotId(1)));
        assert_eq!(f.variable(word).local_slot(), Some(LocalSlotId(2)));
        assert_eq!(f.slots()[2].size, 2);
    }

    #[test]
    fn test_knowledge_dropped_where_predecessors_disagree() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::byte(), &target);
        let x = b.local("x", IrType::byte());
        let y = b.local("y", IrType::byte());
        let join = b.create_anchor();
        b.assign(b.operand(x), byte(1));
        b.branch(Relation::Eq, b.operand(x), byte(0), join);
        b.assign(b.operand(y), byte(2));
        b.place_anchor(join);
        b.ret(Some(b.operand(x)));
        let mut f = b.finish();
        f.compile(&target);

        let known = |a: Address| build_result_variables(f.instructions(), f.variables(), target.registers(), a);
        let fact = RegisterContent::Variable { variable: x, offset: 0 };
        assert_eq!(known(1).get(&A), Some(&fact));
        assert_eq!(known(2).get(&A), Some(&fact));
        assert_eq!(known(3).get(&A), None);
    }

    #[test]
    fn test_demoted_register_parameter_is_stored_on_entry() {
        let target = ToyTarget::new();
        let mut b = FunctionBuilder::new("f", IrType::void(), &target);
        let p = b.parameter("a", IrType::byte());
        let label = b.address_of(p);
        b.ret(None);
        let mut f = b.finish();
        f.compile(&target);

        assert_eq!(label, "f_a");
        assert_eq!(f.prologue(), &["ld a,d".to_string(), "st a,f_a".to_string()]);
    }
}
