//! IR instruction kinds
//!
//! One type per kind, each implementing [`InstructionKind`]. Code bodies
//! are supplied by the target through the `build_*` methods of
//! [`Target`](crate::core::Target).

use crate::core::{AnchorId, EmitContext, InstructionClass, InstructionKind, Operand, OperandRole};

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinOp::Add => write!(f, "+"),
            BinOp::Sub => write!(f, "-"),
            BinOp::And => write!(f, "&"),
            BinOp::Or => write!(f, "|"),
            BinOp::Xor => write!(f, "^"),
            BinOp::Shl => write!(f, "<<"),
            BinOp::Shr => write!(f, ">>"),
        }
    }
}

impl BinOp {
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::And | BinOp::Or | BinOp::Xor)
    }

    pub fn is_shift(&self) -> bool {
        matches!(self, BinOp::Shl | BinOp::Shr)
    }
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BitNot,
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::BitNot => write!(f, "~"),
        }
    }
}

/// Comparisons of a conditional jump. Ordering is unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmpOp::Eq => write!(f, "=="),
            CmpOp::Ne => write!(f, "!="),
            CmpOp::Lt => write!(f, "<"),
            CmpOp::Ge => write!(f, ">="),
        }
    }
}

/// destination = source
#[derive(Debug, Clone)]
pub struct Assign {
    pub destination: Operand,
    pub source: Operand,
}

impl Assign {
    pub fn new(destination: Operand, source: Operand) -> Self {
        Self { destination, source }
    }
}

impl InstructionKind for Assign {
    fn class(&self) -> InstructionClass {
        InstructionClass::Copy
    }

    fn destination(&self) -> Option<&Operand> {
        Some(&self.destination)
    }

    fn sources(&self) -> Vec<&Operand> {
        vec![&self.source]
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        vec![
            (OperandRole::Destination, &self.destination),
            (OperandRole::Source, &self.source),
        ]
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_assign(cx, self);
    }
}

impl std::fmt::Display for Assign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.destination, self.source)
    }
}

/// destination = left op right
#[derive(Debug, Clone)]
pub struct Binomial {
    pub operator: BinOp,
    pub destination: Operand,
    pub left: Operand,
    pub right: Operand,
}

impl Binomial {
    /// Constant count of a shift; front ends reject anything else
    pub fn shift_count(&self) -> usize {
        match self.right.integer_value() {
            Some(count) if count >= 0 => count as usize,
            _ => panic!("shift by non-constant {}", self.right),
        }
    }
}

impl InstructionKind for Binomial {
    fn class(&self) -> InstructionClass {
        InstructionClass::Binomial
    }

    fn destination(&self) -> Option<&Operand> {
        Some(&self.destination)
    }

    fn sources(&self) -> Vec<&Operand> {
        vec![&self.left, &self.right]
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        vec![
            (OperandRole::Destination, &self.destination),
            (OperandRole::Left, &self.left),
            (OperandRole::Right, &self.right),
        ]
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_binomial(cx, self);
    }
}

impl std::fmt::Display for Binomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {} {} {}", self.destination, self.left, self.operator, self.right)
    }
}

/// destination = op source
#[derive(Debug, Clone)]
pub struct Monomial {
    pub operator: UnOp,
    pub destination: Operand,
    pub source: Operand,
}

impl InstructionKind for Monomial {
    fn class(&self) -> InstructionClass {
        InstructionClass::Monomial
    }

    fn destination(&self) -> Option<&Operand> {
        Some(&self.destination)
    }

    fn sources(&self) -> Vec<&Operand> {
        vec![&self.source]
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        vec![
            (OperandRole::Destination, &self.destination),
            (OperandRole::Source, &self.source),
        ]
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_monomial(cx, self);
    }
}

impl std::fmt::Display for Monomial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}{}", self.destination, self.operator, self.source)
    }
}

/// if left op right goto anchor
#[derive(Debug, Clone)]
pub struct CompareJump {
    pub operator: CmpOp,
    pub left: Operand,
    pub right: Operand,
    pub anchor: AnchorId,
}

impl InstructionKind for CompareJump {
    fn class(&self) -> InstructionClass {
        InstructionClass::CompareJump
    }

    fn is_jump(&self) -> bool {
        true
    }

    fn jump_target(&self) -> Option<AnchorId> {
        Some(self.anchor)
    }

    fn sources(&self) -> Vec<&Operand> {
        vec![&self.left, &self.right]
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        vec![(OperandRole::Left, &self.left), (OperandRole::Right, &self.right)]
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_compare_jump(cx, self);
    }
}

impl std::fmt::Display for CompareJump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if {} {} {} goto {}", self.left, self.operator, self.right, self.anchor)
    }
}

/// goto anchor
#[derive(Debug, Clone)]
pub struct Jump {
    pub anchor: AnchorId,
}

impl InstructionKind for Jump {
    fn class(&self) -> InstructionClass {
        InstructionClass::Jump
    }

    fn is_jump(&self) -> bool {
        true
    }

    fn is_unconditional_jump(&self) -> bool {
        true
    }

    fn jump_target(&self) -> Option<AnchorId> {
        Some(self.anchor)
    }

    fn sources(&self) -> Vec<&Operand> {
        Vec::new()
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        Vec::new()
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_jump(cx, self);
    }
}

impl std::fmt::Display for Jump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "goto {}", self.anchor)
    }
}

/// destination = callee(arguments...)
#[derive(Debug, Clone)]
pub struct Call {
    pub callee: String,
    pub arguments: Vec<Operand>,
    pub destination: Option<Operand>,
}

impl InstructionKind for Call {
    fn class(&self) -> InstructionClass {
        InstructionClass::Call
    }

    fn destination(&self) -> Option<&Operand> {
        self.destination.as_ref()
    }

    fn sources(&self) -> Vec<&Operand> {
        self.arguments.iter().collect()
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        let mut operands: Vec<(OperandRole, &Operand)> = self
            .arguments
            .iter()
            .enumerate()
            .map(|(index, argument)| (OperandRole::Argument(index), argument))
            .collect();
        if let Some(destination) = &self.destination {
            operands.push((OperandRole::Destination, destination));
        }
        operands
    }

    fn clobbers_all_registers(&self) -> bool {
        true
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_call(cx, self);
    }
}

impl std::fmt::Display for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(destination) = &self.destination {
            write!(f, "{} = ", destination)?;
        }
        write!(f, "call {}(", self.callee)?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")
    }
}

/// Leave the function, optionally with a value
#[derive(Debug, Clone)]
pub struct Return {
    pub value: Option<Operand>,
}

impl InstructionKind for Return {
    fn class(&self) -> InstructionClass {
        InstructionClass::Return
    }

    fn is_jump(&self) -> bool {
        true
    }

    fn is_unconditional_jump(&self) -> bool {
        true
    }

    fn sources(&self) -> Vec<&Operand> {
        self.value.iter().collect()
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        self.value.iter().map(|value| (OperandRole::Value, value)).collect()
    }

    fn ignores_register_variables(&self) -> bool {
        true
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>) {
        let target = cx.target();
        target.build_return(cx, self);
    }
}

impl std::fmt::Display for Return {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "return {}", value),
            None => write!(f, "return"),
        }
    }
}

/// Placeholder giving a trailing anchor an address; emits nothing
#[derive(Debug, Clone, Default)]
pub struct Empty;

impl InstructionKind for Empty {
    fn class(&self) -> InstructionClass {
        InstructionClass::Empty
    }

    fn sources(&self) -> Vec<&Operand> {
        Vec::new()
    }

    fn operands(&self) -> Vec<(OperandRole, &Operand)> {
        Vec::new()
    }

    fn build_assembly(&self, _cx: &mut EmitContext<'_>) {}
}

impl std::fmt::Display for Empty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VariableId;
    use crate::types::IrType;

    fn var(id: usize) -> Operand {
        Operand::variable(IrType::byte(), VariableId(id))
    }

    #[test]
    fn test_jump_classification() {
        let jump = Jump { anchor: AnchorId(0) };
        let branch = CompareJump { operator: CmpOp::Lt, left: var(0), right: var(1), anchor: AnchorId(1) };
        let ret = Return { value: None };
        assert!(jump.is_unconditional_jump());
        assert!(branch.is_jump() && !branch.is_unconditional_jump());
        assert!(ret.is_unconditional_jump());
        assert_eq!(branch.jump_target(), Some(AnchorId(1)));
        assert_eq!(ret.jump_target(), None);
    }

    #[test]
    fn test_call_operands() {
        let call = Call {
            callee: "f".to_string(),
            arguments: vec![var(0), Operand::integer(IrType::byte(), 3)],
            destination: Some(var(2)),
        };
        let roles: Vec<OperandRole> = call.operands().into_iter().map(|(role, _)| role).collect();
        assert_eq!(
            roles,
            vec![OperandRole::Argument(0), OperandRole::Argument(1), OperandRole::Destination]
        );
        assert!(call.clobbers_all_registers());
        assert!(call.ignores_register_variables());
    }

    #[test]
    fn test_display() {
        let add = Binomial { operator: BinOp::Add, destination: var(2), left: var(0), right: var(1) };
        assert_eq!(add.to_string(), "%2 = %0 + %1");
        let call = Call { callee: "put".to_string(), arguments: vec![var(0)], destination: None };
        assert_eq!(call.to_string(), "call put(%0)");
        assert_eq!(Jump { anchor: AnchorId(4) }.to_string(), "goto L4");
    }
}
