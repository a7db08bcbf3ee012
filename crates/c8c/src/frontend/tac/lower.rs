//! Lowering of a parsed listing into IR
//!
//! Resolves names and labels, types constants from their context and
//! reports every semantic error with the span it was found at.

use std::collections::{HashMap, HashSet};

use super::ast::*;
use crate::common::{CompileError, CompileResult, Span};
use crate::core::{AnchorId, Operand, Target, VariableId};
use crate::ir::{FunctionBuilder, IrModule, ModuleBuilder};
use crate::types::{IrType, IrTypeKind};

/// Lower `program` into a module named `name` for `target`
pub fn lower(program: &Program, name: &str, target: &dyn Target) -> CompileResult<IrModule> {
    let mut lowerer = Lowerer {
        program,
        module: ModuleBuilder::new(name, target),
        globals: HashMap::new(),
    };
    lowerer.declare_items()?;
    for item in &program.items {
        if let Item::Function(def) = item {
            lowerer.lower_function(def)?;
        }
    }
    Ok(lowerer.module.finish())
}

struct Lowerer<'p, 't> {
    program: &'p Program,
    module: ModuleBuilder<'t>,
    globals: HashMap<Name, IrType>,
}

/// Per-function name state
#[derive(Default)]
struct Scope {
    labels: HashMap<Name, AnchorId>,
    locals: HashSet<Name>,
}

impl<'p, 't> Lowerer<'p, 't> {
    fn text(&self, name: Name) -> &'p str {
        self.program.name(name)
    }

    // ==================== Declarations ====================

    fn declare_items(&mut self) -> CompileResult<()> {
        let mut seen: HashSet<Name> = HashSet::new();
        for item in &self.program.items {
            let (name, span) = match item {
                Item::Global(global) => (global.name, global.span),
                Item::Extern(decl) => (decl.name, decl.span),
                Item::Function(def) => (def.decl.name, def.decl.span),
            };
            if !seen.insert(name) {
                return Err(CompileError::semantic(
                    format!("'{}' is already defined", self.text(name)),
                    span,
                ));
            }

            match item {
                Item::Global(global) => self.declare_global(global)?,
                Item::Extern(decl) => {
                    let parameters = self.check_signature(decl)?;
                    self.module
                        .declare_extern(self.text(decl.name), parameters, decl.return_type.clone());
                }
                Item::Function(def) => {
                    let parameters = self.check_signature(&def.decl)?;
                    self.module
                        .declare_function(self.text(def.decl.name), parameters, def.decl.return_type.clone());
                }
            }
        }
        Ok(())
    }

    fn declare_global(&mut self, global: &Global) -> CompileResult<()> {
        let ty = &global.ty;
        let init = match &global.init {
            None => None,
            Some(Initializer::Integer(value)) => {
                if !ty.is_parameterizable() {
                    return Err(CompileError::semantic(
                        format!("integer initializer for {} '{}'", ty, self.text(global.name)),
                        global.span,
                    ));
                }
                check_fits(*value, ty, global.span)?;
                Some((0..ty.size).map(|i| (*value >> (8 * i)) as u8).collect())
            }
            Some(Initializer::Bytes(text)) => {
                let byte_array = ty.is_array() && ty.element_type().is_some_and(|e| e.size == 1);
                if !byte_array {
                    return Err(CompileError::semantic(
                        format!("string initializer for {} '{}' needs a byte array", ty, self.text(global.name)),
                        global.span,
                    ));
                }
                if text.len() + 1 > ty.size {
                    return Err(CompileError::semantic(
                        format!("string of {} bytes does not fit in {}", text.len() + 1, ty),
                        global.span,
                    ));
                }
                let mut bytes = text.clone();
                bytes.resize(ty.size, 0);
                Some(bytes)
            }
        };
        self.globals.insert(global.name, ty.clone());
        self.module.add_global(self.text(global.name), ty.clone(), init);
        Ok(())
    }

    fn check_signature(&self, decl: &FunctionDecl) -> CompileResult<Vec<IrType>> {
        for param in &decl.params {
            if !param.ty.is_parameterizable() {
                return Err(CompileError::semantic(
                    format!("parameter '{}' must be a byte, word or pointer", self.text(param.name)),
                    param.span,
                ));
            }
        }
        if !decl.return_type.is_void() && !decl.return_type.is_parameterizable() {
            return Err(CompileError::semantic(
                format!("'{}' cannot return {}", self.text(decl.name), decl.return_type),
                decl.span,
            ));
        }
        Ok(decl.params.iter().map(|p| p.ty.clone()).collect())
    }

    // ==================== Functions ====================

    fn lower_function(&mut self, def: &FunctionDef) -> CompileResult<()> {
        let decl = &def.decl;
        let mut b = self.module.function(self.text(decl.name), decl.return_type.clone());
        let mut scope = Scope::default();

        for param in &decl.params {
            if !scope.locals.insert(param.name) {
                return Err(CompileError::semantic(
                    format!("duplicate parameter '{}'", self.text(param.name)),
                    param.span,
                ));
            }
            b.parameter(self.text(param.name), param.ty.clone());
        }

        for stmt in &def.body {
            if let StmtKind::Label(label) = stmt.kind {
                if scope.labels.contains_key(&label) {
                    return Err(CompileError::semantic(
                        format!("duplicate label '{}'", self.text(label)),
                        stmt.span,
                    ));
                }
                scope.labels.insert(label, b.create_anchor());
            }
        }

        for stmt in &def.body {
            self.lower_stmt(&mut b, &mut scope, stmt)?;
        }

        if b.falls_through() {
            if !decl.return_type.is_void() {
                return Err(CompileError::semantic(
                    format!("'{}' reaches its end without returning a value", self.text(decl.name)),
                    def.end,
                ));
            }
            b.ret(None);
        }
        self.module.add_function(b.finish());
        Ok(())
    }

    fn lower_stmt(&mut self, b: &mut FunctionBuilder<'t>, scope: &mut Scope, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Var { name, ty } => {
                if !scope.locals.insert(*name) {
                    return Err(CompileError::semantic(
                        format!("'{}' is already declared", self.text(*name)),
                        stmt.span,
                    ));
                }
                b.local(self.text(*name), ty.clone());
            }
            StmtKind::Label(label) => b.place_anchor(scope.labels[label]),
            StmtKind::Goto(label) => {
                let anchor = self.label(scope, *label, stmt.span)?;
                b.jump(anchor);
            }
            StmtKind::If { left, relation, right, label } => {
                let anchor = self.label(scope, *label, stmt.span)?;
                let (left, right) = if matches!(left.kind, ValueKind::Integer(_)) {
                    let right = self.value(b, right, None)?;
                    let left = self.value(b, left, Some(right.ty()))?;
                    (left, right)
                } else {
                    let left = self.value(b, left, None)?;
                    let right = self.value(b, right, Some(left.ty()))?;
                    (left, right)
                };
                check_size(&right, left.ty(), stmt.span)?;
                b.branch(*relation, left, right, anchor);
            }
            StmtKind::Return(value) => {
                let return_type = b.return_type().clone();
                match value {
                    Some(_) if return_type.is_void() => {
                        return Err(CompileError::semantic(
                            format!("'{}' returns no value", b.name()),
                            stmt.span,
                        ));
                    }
                    None if !return_type.is_void() => {
                        return Err(CompileError::semantic(
                            format!("'{}' must return a {}", b.name(), return_type),
                            stmt.span,
                        ));
                    }
                    Some(value) => {
                        let operand = self.value(b, value, Some(&return_type))?;
                        check_size(&operand, &return_type, value.span)?;
                        b.ret(Some(operand));
                    }
                    None => {
                        b.ret(None);
                    }
                }
            }
            StmtKind::Call(call) => self.lower_call(b, call, None)?,
            StmtKind::Assign { place, rhs } => {
                let destination = self.place(b, place)?;
                let ty = destination.ty().clone();
                match rhs {
                    Rhs::Value(value) => {
                        let source = self.value(b, value, Some(&ty))?;
                        check_size(&source, &ty, value.span)?;
                        b.assign(destination, source);
                    }
                    Rhs::Unary(operator, value) => {
                        let source = self.value(b, value, Some(&ty))?;
                        check_size(&source, &ty, value.span)?;
                        b.monomial(*operator, destination, source);
                    }
                    Rhs::Binary(left, operator, right) => {
                        let left_operand = self.value(b, left, Some(&ty))?;
                        check_size(&left_operand, &ty, left.span)?;
                        let right_operand = if operator.is_shift() {
                            let ValueKind::Integer(count) = right.kind else {
                                return Err(CompileError::semantic("shift count must be a constant", right.span));
                            };
                            if !(0..8 * ty.size as i64).contains(&count) {
                                return Err(CompileError::semantic(
                                    format!("shift count {} out of range for {}", count, ty),
                                    right.span,
                                ));
                            }
                            Operand::integer(IrType::byte(), count)
                        } else {
                            let operand = self.value(b, right, Some(&ty))?;
                            check_size(&operand, &ty, right.span)?;
                            operand
                        };
                        b.binomial(*operator, destination, left_operand, right_operand);
                    }
                    Rhs::Call(call) => self.lower_call(b, call, Some(destination))?,
                }
            }
        }
        Ok(())
    }

    fn label(&self, scope: &Scope, label: Name, span: Span) -> CompileResult<AnchorId> {
        scope
            .labels
            .get(&label)
            .copied()
            .ok_or_else(|| CompileError::semantic(format!("unknown label '{}'", self.text(label)), span))
    }

    fn lower_call(
        &mut self,
        b: &mut FunctionBuilder<'t>,
        call: &CallExpr,
        destination: Option<Operand>,
    ) -> CompileResult<()> {
        let callee = self.text(call.callee);
        let Some(signature) = self.module.signature(callee).cloned() else {
            return Err(CompileError::semantic(format!("unknown function '{}'", callee), call.span));
        };
        if signature.parameters.len() != call.args.len() {
            return Err(CompileError::semantic(
                format!(
                    "'{}' expects {} arguments, found {}",
                    callee,
                    signature.parameters.len(),
                    call.args.len()
                ),
                call.span,
            ));
        }

        let mut arguments = Vec::with_capacity(call.args.len());
        for (value, ty) in call.args.iter().zip(&signature.parameters) {
            let operand = self.value(b, value, Some(ty))?;
            check_size(&operand, ty, value.span)?;
            arguments.push(operand);
        }

        let Some(destination) = destination else {
            b.call(callee, arguments, None);
            return Ok(());
        };
        if signature.return_type.is_void() {
            return Err(CompileError::semantic(format!("'{}' returns no value", callee), call.span));
        }
        check_size(&destination, &signature.return_type, call.span)?;

        // a pointer read after the call may not survive it in a register
        if matches!(destination, Operand::Indirect { .. }) {
            let temporary = b.temporary(destination.ty().clone());
            let result = b.operand(temporary);
            b.call(callee, arguments, Some(result.clone()));
            b.assign(destination, result);
        } else {
            b.call(callee, arguments, Some(destination));
        }
        Ok(())
    }

    // ==================== Operands ====================

    fn resolve(&self, b: &mut FunctionBuilder<'t>, name: Name, span: Span) -> CompileResult<VariableId> {
        let text = self.text(name);
        if let Some(id) = b.lookup(text) {
            return Ok(id);
        }
        match self.globals.get(&name) {
            Some(ty) => Ok(b.global(text, ty.clone())),
            None => Err(CompileError::semantic(format!("unknown name '{}'", text), span)),
        }
    }

    fn place(&self, b: &mut FunctionBuilder<'t>, place: &Place) -> CompileResult<Operand> {
        match place.kind {
            PlaceKind::Name(name) => {
                let id = self.resolve(b, name, place.span)?;
                let ty = b.variable_type(id).clone();
                if !ty.is_parameterizable() {
                    return Err(CompileError::semantic(
                        format!("'{}' is a {} and must be indexed", self.text(name), ty),
                        place.span,
                    ));
                }
                Ok(Operand::variable(ty, id))
            }
            PlaceKind::Deref(name) => {
                let id = self.resolve(b, name, place.span)?;
                let element = self.element(b, id, name, place.span)?;
                if !b.variable_type(id).is_pointer() {
                    return Err(CompileError::semantic(
                        format!("'{}' is not a pointer", self.text(name)),
                        place.span,
                    ));
                }
                Ok(Operand::indirect(element, id, 0))
            }
            PlaceKind::Index(name, index) => {
                let id = self.resolve(b, name, place.span)?;
                let element = self.element(b, id, name, place.span)?;
                let ty = b.variable_type(id);
                let count = match ty.kind {
                    IrTypeKind::Array { count, .. } => count as i64,
                    _ => i64::MAX,
                };
                if index < 0 || index >= count {
                    return Err(CompileError::semantic(
                        format!("index {} is out of bounds for {}", index, ty),
                        place.span,
                    ));
                }
                let offset = index as usize * element.size;
                if ty.is_pointer() {
                    Ok(Operand::indirect(element, id, offset))
                } else {
                    Ok(Operand::variable_at(element, id, offset))
                }
            }
        }
    }

    /// Scalar element type of a pointer or array variable
    fn element(&self, b: &FunctionBuilder<'t>, id: VariableId, name: Name, span: Span) -> CompileResult<IrType> {
        match b.variable_type(id).element_type() {
            Some(element) if element.is_parameterizable() => Ok(element.clone()),
            Some(element) => Err(CompileError::semantic(
                format!("elements of '{}' are {}, not bytes or words", self.text(name), element),
                span,
            )),
            None => Err(CompileError::semantic(
                format!("'{}' cannot be indexed", self.text(name)),
                span,
            )),
        }
    }

    /// Operand of a value; constants take the type `expected`
    fn value(&mut self, b: &mut FunctionBuilder<'t>, value: &Value, expected: Option<&IrType>) -> CompileResult<Operand> {
        match &value.kind {
            ValueKind::Integer(v) => {
                let ty = match expected {
                    Some(ty) if ty.is_parameterizable() => ty.clone(),
                    _ if fits(*v, 1) => IrType::byte(),
                    _ => IrType::word(),
                };
                check_fits(*v, &ty, value.span)?;
                Ok(Operand::integer(ty, *v))
            }
            ValueKind::String(text) => Ok(Operand::string(self.module.add_string(text))),
            ValueKind::AddressOf(name) => {
                let text = self.text(*name);
                if self.module.signature(text).is_some() && b.lookup(text).is_none() {
                    return Ok(Operand::pointer(IrType::ptr(IrType::byte()), text, 0));
                }
                let id = self.resolve(b, *name, value.span)?;
                let ty = IrType::ptr(b.variable_type(id).clone());
                let label = b.address_of(id);
                Ok(Operand::pointer(ty, label, 0))
            }
            ValueKind::Place(place) => self.place(b, place),
        }
    }
}

fn fits(value: i64, size: usize) -> bool {
    let bits = 8 * size as u32;
    value >= -(1 << (bits - 1)) && value < (1 << bits)
}

fn check_fits(value: i64, ty: &IrType, span: Span) -> CompileResult<()> {
    if fits(value, ty.size) {
        Ok(())
    } else {
        Err(CompileError::semantic(format!("constant {} does not fit in {}", value, ty), span))
    }
}

fn check_size(operand: &Operand, ty: &IrType, span: Span) -> CompileResult<()> {
    if operand.size() == ty.size {
        Ok(())
    } else {
        Err(CompileError::semantic(
            format!("size mismatch: expected {}, found {}", ty, operand.ty()),
            span,
        ))
    }
}
