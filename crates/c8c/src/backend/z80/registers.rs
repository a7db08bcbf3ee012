//! Z80 register set
//!
//! The three general pairs are made of addressable halves; IX and IY are
//! only usable as whole words.

use crate::core::{Register, RegisterCatalog, RegisterId};

pub const A: RegisterId = RegisterId(0);
pub const B: RegisterId = RegisterId(1);
pub const C: RegisterId = RegisterId(2);
pub const D: RegisterId = RegisterId(3);
pub const E: RegisterId = RegisterId(4);
pub const H: RegisterId = RegisterId(5);
pub const L: RegisterId = RegisterId(6);
pub const BC: RegisterId = RegisterId(7);
pub const DE: RegisterId = RegisterId(8);
pub const HL: RegisterId = RegisterId(9);
pub const IX: RegisterId = RegisterId(10);
pub const IY: RegisterId = RegisterId(11);

/// Byte registers in the order variables prefer them
pub const BYTE_REGISTERS: [RegisterId; 7] = [B, C, D, E, H, L, A];

/// Word registers in the order variables prefer them
pub const WORD_REGISTERS: [RegisterId; 5] = [HL, DE, BC, IX, IY];

/// Pairs whose halves can be moved one byte at a time
pub const PAIRS: [RegisterId; 3] = [BC, DE, HL];

pub fn catalog() -> RegisterCatalog {
    RegisterCatalog::new(vec![
        Register::byte(0, "a"),
        Register::byte(1, "b"),
        Register::byte(2, "c"),
        Register::byte(3, "d"),
        Register::byte(4, "e"),
        Register::byte(5, "h"),
        Register::byte(6, "l"),
        Register::pair(7, "bc", 2, 1),
        Register::pair(8, "de", 4, 3),
        Register::pair(9, "hl", 6, 5),
        Register::word(10, "ix"),
        Register::word(11, "iy"),
    ])
}

pub fn is_index(register: RegisterId) -> bool {
    register == IX || register == IY
}
