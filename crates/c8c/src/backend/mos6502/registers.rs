//! 6502 register set
//!
//! Three independent byte registers. Only the index registers hold
//! variables; every word lives in memory.

use crate::core::{Register, RegisterCatalog, RegisterId};

pub const A: RegisterId = RegisterId(0);
pub const X: RegisterId = RegisterId(1);
pub const Y: RegisterId = RegisterId(2);

/// Registers variables may live in, in order of preference
pub const INDEX_REGISTERS: [RegisterId; 2] = [X, Y];

pub fn catalog() -> RegisterCatalog {
    RegisterCatalog::new(vec![
        Register::byte(0, "a"),
        Register::byte(1, "x"),
        Register::byte(2, "y"),
    ])
}

/// Mnemonic suffix of a register: `lda`, `ldx`, `ldy`
pub fn suffix(register: RegisterId) -> &'static str {
    match register {
        A => "a",
        X => "x",
        Y => "y",
        other => panic!("no 6502 register {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_are_independent() {
        let catalog = catalog();
        assert!(!catalog.conflicts(X, Y));
        assert!(!catalog.conflicts(A, X));
        assert_eq!(catalog.container(Y), None);
        assert_eq!(catalog.by_name("x"), Some(X));
    }
}
