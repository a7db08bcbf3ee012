//! Operands of IR instructions

use std::fmt;

use super::register::RegisterId;
use super::variable::{Address, UsageKind, Variable, VariableId};
use crate::types::IrType;

/// The location of one value at one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Integer constant
    Integer { ty: IrType, value: i64 },

    /// Address of a string literal in the data segment
    String { ty: IrType, label: String },

    /// Address of a static symbol plus a byte offset
    Pointer { ty: IrType, symbol: String, offset: i64 },

    /// A variable, `offset` bytes in
    Variable { ty: IrType, variable: VariableId, offset: usize },

    /// Memory addressed through a pointer variable
    Indirect { ty: IrType, pointer: VariableId, offset: usize },

    /// A physical register
    Register { ty: IrType, register: RegisterId },
}

impl Operand {
    pub fn integer(ty: IrType, value: i64) -> Self {
        Operand::Integer { ty, value }
    }

    pub fn string(label: impl Into<String>) -> Self {
        Operand::String { ty: IrType::ptr(IrType::byte()), label: label.into() }
    }

    pub fn pointer(ty: IrType, symbol: impl Into<String>, offset: i64) -> Self {
        Operand::Pointer { ty, symbol: symbol.into(), offset }
    }

    pub fn variable(ty: IrType, variable: VariableId) -> Self {
        Operand::Variable { ty, variable, offset: 0 }
    }

    pub fn variable_at(ty: IrType, variable: VariableId, offset: usize) -> Self {
        Operand::Variable { ty, variable, offset }
    }

    pub fn indirect(ty: IrType, pointer: VariableId, offset: usize) -> Self {
        Operand::Indirect { ty, pointer, offset }
    }

    pub fn register(ty: IrType, register: RegisterId) -> Self {
        Operand::Register { ty, register }
    }

    pub fn ty(&self) -> &IrType {
        match self {
            Operand::Integer { ty, .. }
            | Operand::String { ty, .. }
            | Operand::Pointer { ty, .. }
            | Operand::Variable { ty, .. }
            | Operand::Indirect { ty, .. }
            | Operand::Register { ty, .. } => ty,
        }
    }

    pub fn size(&self) -> usize {
        self.ty().size
    }

    /// Notify the underlying variable of an access at `address`.
    /// Indirect access reads the pointer whatever it does to the pointee.
    pub fn add_usage(&self, address: Address, kind: UsageKind, variables: &mut [Variable]) {
        match self {
            Operand::Variable { variable, .. } => variables[variable.0].add_usage(address, kind),
            Operand::Indirect { pointer, .. } => {
                variables[pointer.0].add_usage(address, UsageKind::Read)
            }
            _ => {}
        }
    }

    /// The variable whose value this operand is
    pub fn variable_id(&self) -> Option<VariableId> {
        match self {
            Operand::Variable { variable, .. } => Some(*variable),
            _ => None,
        }
    }

    /// The variable this operand reads or writes, directly or as a pointer
    pub fn referenced_variable(&self) -> Option<VariableId> {
        match self {
            Operand::Variable { variable, .. } => Some(*variable),
            Operand::Indirect { pointer, .. } => Some(*pointer),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Operand::Integer { .. } | Operand::String { .. } | Operand::Pointer { .. }
        )
    }

    pub fn integer_value(&self) -> Option<i64> {
        match self {
            Operand::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Integer { value, .. } => write!(f, "{}", value),
            Operand::String { label, .. } => write!(f, "&{}", label),
            Operand::Pointer { symbol, offset: 0, .. } => write!(f, "&{}", symbol),
            Operand::Pointer { symbol, offset, .. } => write!(f, "&{}+{}", symbol, offset),
            Operand::Variable { variable, offset: 0, .. } => write!(f, "{}", variable),
            Operand::Variable { variable, offset, .. } => write!(f, "{}+{}", variable, offset),
            Operand::Indirect { pointer, offset: 0, .. } => write!(f, "*{}", pointer),
            Operand::Indirect { pointer, offset, .. } => write!(f, "*({}+{})", pointer, offset),
            Operand::Register { register, .. } => write!(f, "${}", register),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variable::Usage;

    #[test]
    fn test_indirect_write_reads_pointer() {
        let mut vars = vec![Variable::new(VariableId(0), "p", IrType::ptr(IrType::byte()), false)];
        let operand = Operand::indirect(IrType::byte(), VariableId(0), 0);
        operand.add_usage(4, UsageKind::Write, &mut vars);
        assert_eq!(vars[0].usage_at(4), Some(Usage { read: true, write: false }));
    }

    #[test]
    fn test_constant_has_no_usage() {
        let mut vars = vec![Variable::new(VariableId(0), "x", IrType::byte(), false)];
        Operand::integer(IrType::byte(), 3).add_usage(0, UsageKind::Read, &mut vars);
        assert!(!vars[0].has_usages());
    }

    #[test]
    fn test_display() {
        assert_eq!(Operand::variable_at(IrType::byte(), VariableId(2), 1).to_string(), "%2+1");
        assert_eq!(Operand::indirect(IrType::byte(), VariableId(1), 0).to_string(), "*%1");
        assert_eq!(Operand::pointer(IrType::ptr(IrType::byte()), "buf", 3).to_string(), "&buf+3");
    }
}
