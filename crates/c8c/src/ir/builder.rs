//! IR builders - the interface front ends emit instructions through
//!
//! `FunctionBuilder` keeps the usage maps and anchor origins of a
//! `Function` in step with the instructions it appends, binds parameters
//! to the target's calling convention and extends the liveness of values
//! carried around loops.

use std::collections::HashMap;

use tracing::trace;

use super::inst::*;
use super::module::{IrExtern, IrGlobal, IrModule, IrString};
use crate::core::labels;
use crate::core::{
    Address, AnchorId, Function, InstructionKind, Operand, OperandRole, Storage, Target, UsageKind, VariableId,
};
use crate::types::IrType;

/// Every relation a front end may branch on. `>` and `<=` are expressed
/// by swapping the operands of `<` and `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    /// The comparison to emit and whether the operands are swapped
    pub fn lower(self) -> (CmpOp, bool) {
        match self {
            Relation::Eq => (CmpOp::Eq, false),
            Relation::Ne => (CmpOp::Ne, false),
            Relation::Lt => (CmpOp::Lt, false),
            Relation::Ge => (CmpOp::Ge, false),
            Relation::Gt => (CmpOp::Lt, true),
            Relation::Le => (CmpOp::Ge, true),
        }
    }
}

/// Calling signature of a function known to the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub parameters: Vec<IrType>,
    pub return_type: IrType,
    pub external: bool,
}

/// Builds one function
pub struct FunctionBuilder<'t> {
    target: &'t dyn Target,
    function: Function,
    names: HashMap<String, VariableId>,
}

impl<'t> FunctionBuilder<'t> {
    pub fn new(name: impl Into<String>, return_type: IrType, target: &'t dyn Target) -> Self {
        Self {
            target,
            function: Function::new(name, return_type),
            names: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn return_type(&self) -> &IrType {
        self.function.return_type()
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    // ==================== Variables ====================

    /// Declare the next parameter and bind it to its calling-convention home
    pub fn parameter(&mut self, name: &str, ty: IrType) -> VariableId {
        let index = self.function.parameters().len();
        let register = self.target.parameter_register(index, &ty);
        let id = self.function.add_variable(name, ty);
        self.function.add_parameter(id, register);
        self.names.insert(name.to_string(), id);
        id
    }

    /// Declare a local variable. Aggregates live in static memory.
    pub fn local(&mut self, name: &str, ty: IrType) -> VariableId {
        let parameterizable = ty.is_parameterizable();
        let id = self.function.add_variable(name, ty);
        if !parameterizable {
            let label = labels::static_label(self.function.name(), name);
            self.function.variable_mut(id).set_static(label);
        }
        self.names.insert(name.to_string(), id);
        id
    }

    /// Make a module-level variable visible under its own name
    pub fn global(&mut self, name: &str, ty: IrType) -> VariableId {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = self.function.add_global(name, ty);
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn temporary(&mut self, ty: IrType) -> VariableId {
        self.function.add_temporary(ty)
    }

    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.names.get(name).copied()
    }

    pub fn variable_type(&self, id: VariableId) -> &IrType {
        self.function.variable(id).ty()
    }

    /// Operand reading or writing the whole of a variable
    pub fn operand(&self, id: VariableId) -> Operand {
        Operand::variable(self.variable_type(id).clone(), id)
    }

    /// Label of a variable that must have an address, moving it to static
    /// memory if it is not there yet
    pub fn address_of(&mut self, id: VariableId) -> String {
        let function_name = self.function.name().to_string();
        let variable = self.function.variable_mut(id);
        if let Storage::Static(label) = variable.storage() {
            return label.clone();
        }
        let label = labels::static_label(&function_name, variable.name());
        variable.set_static(label.clone());
        label
    }

    // ==================== Anchors ====================

    pub fn create_anchor(&mut self) -> AnchorId {
        self.function.create_anchor()
    }

    /// Resolve `anchor` to the next instruction emitted
    pub fn place_anchor(&mut self, anchor: AnchorId) {
        let address = self.function.next_address();
        self.function.anchor_mut(anchor).set_address(address);
    }

    pub fn is_anchor_placed(&self, anchor: AnchorId) -> bool {
        self.function.anchor(anchor).is_placed()
    }

    // ==================== Instructions ====================

    /// Append an instruction, recording its variable usages and jump origin
    pub fn emit(&mut self, kind: impl InstructionKind + 'static) -> Address {
        let address = self.function.next_address();
        for (role, operand) in kind.operands() {
            let usage = if role == OperandRole::Destination { UsageKind::Write } else { UsageKind::Read };
            operand.add_usage(address, usage, self.function.variables_mut());
        }

        let jump_target = kind.jump_target();
        self.function.push_instruction(Box::new(kind));

        if let Some(anchor) = jump_target {
            self.function.anchor_mut(anchor).add_origin(address);
            if let Some(top) = self.function.anchor(anchor).address() {
                self.extend_loop_liveness(top, address);
            }
        }
        address
    }

    /// A backward jump from `jump` to `top` carries every value that was
    /// defined before the loop and last used inside it around the loop
    fn extend_loop_liveness(&mut self, top: Address, jump: Address) {
        if top > jump {
            return;
        }
        for variable in self.function.variables_mut() {
            let (Some(first), Some(last)) = (variable.first_address(), variable.last_address()) else {
                continue;
            };
            if first < top && top <= last && last < jump {
                trace!(variable = variable.name(), top, jump, "live around loop");
                variable.add_usage(jump, UsageKind::Read);
            }
        }
    }

    pub fn assign(&mut self, destination: Operand, source: Operand) -> Address {
        self.emit(Assign::new(destination, source))
    }

    pub fn binomial(&mut self, operator: BinOp, destination: Operand, left: Operand, right: Operand) -> Address {
        self.emit(Binomial { operator, destination, left, right })
    }

    pub fn monomial(&mut self, operator: UnOp, destination: Operand, source: Operand) -> Address {
        self.emit(Monomial { operator, destination, source })
    }

    pub fn branch(&mut self, relation: Relation, left: Operand, right: Operand, anchor: AnchorId) -> Address {
        let (operator, swapped) = relation.lower();
        let (left, right) = if swapped { (right, left) } else { (left, right) };
        self.emit(CompareJump { operator, left, right, anchor })
    }

    pub fn jump(&mut self, anchor: AnchorId) -> Address {
        self.emit(Jump { anchor })
    }

    pub fn call(&mut self, callee: impl Into<String>, arguments: Vec<Operand>, destination: Option<Operand>) -> Address {
        self.emit(Call { callee: callee.into(), arguments, destination })
    }

    pub fn ret(&mut self, value: Option<Operand>) -> Address {
        self.emit(Return { value })
    }

    /// Whether the last instruction never falls through
    pub fn ends_in_jump(&self) -> bool {
        self.function
            .instructions()
            .last()
            .is_some_and(|instruction| instruction.kind().is_unconditional_jump())
    }

    /// Whether control can reach the end of the instructions emitted so far
    pub fn falls_through(&self) -> bool {
        let end = self.function.next_address();
        !self.ends_in_jump() || self.function.anchors().iter().any(|anchor| anchor.address() == Some(end))
    }

    /// Finish the function. An anchor placed after the last instruction
    /// gets an empty instruction to resolve to.
    pub fn finish(mut self) -> Function {
        let end = self.function.next_address();
        if self.function.anchors().iter().any(|anchor| anchor.address() == Some(end)) {
            self.emit(Empty);
        }
        for anchor in self.function.anchors() {
            assert!(anchor.is_placed(), "anchor {} was never placed", anchor.id());
        }
        self.function
    }
}

/// Builds a module: globals, strings, signatures and finished functions
pub struct ModuleBuilder<'t> {
    target: &'t dyn Target,
    module: IrModule,
    signatures: HashMap<String, Signature>,
}

impl<'t> ModuleBuilder<'t> {
    pub fn new(name: impl Into<String>, target: &'t dyn Target) -> Self {
        Self {
            target,
            module: IrModule::new(name),
            signatures: HashMap::new(),
        }
    }

    pub fn target(&self) -> &'t dyn Target {
        self.target
    }

    pub fn add_global(&mut self, name: impl Into<String>, ty: IrType, init: Option<Vec<u8>>) {
        self.module.globals.push(IrGlobal { name: name.into(), ty, init });
    }

    pub fn global(&self, name: &str) -> Option<&IrGlobal> {
        self.module.globals.iter().find(|g| g.name == name)
    }

    /// Place a NUL-terminated string in the data segment; returns its label
    pub fn add_string(&mut self, text: &[u8]) -> String {
        let label = labels::string_label(self.module.strings.len());
        let mut bytes = text.to_vec();
        bytes.push(0);
        self.module.strings.push(IrString { label: label.clone(), bytes });
        label
    }

    pub fn declare_function(&mut self, name: impl Into<String>, parameters: Vec<IrType>, return_type: IrType) {
        self.signatures.insert(name.into(), Signature { parameters, return_type, external: false });
    }

    pub fn declare_extern(&mut self, name: impl Into<String>, parameters: Vec<IrType>, return_type: IrType) {
        let name = name.into();
        self.module.externs.push(IrExtern {
            name: name.clone(),
            parameters: parameters.clone(),
            return_type: return_type.clone(),
        });
        self.signatures.insert(name, Signature { parameters, return_type, external: true });
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    pub fn function(&self, name: impl Into<String>, return_type: IrType) -> FunctionBuilder<'t> {
        FunctionBuilder::new(name, return_type, self.target)
    }

    pub fn add_function(&mut self, function: Function) {
        self.module.functions.push(function);
    }

    pub fn finish(self) -> IrModule {
        self.module
    }
}
