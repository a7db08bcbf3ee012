//! MOS 6502 code generation backend
//!
//! This backend emits 6502 assembly in ca65 syntax. Byte variables may
//! live in X and Y; words and everything behind pointers stay in memory.

mod emit;
mod registers;

pub use emit::Mos6502Target;
pub use registers::*;

use crate::backend::Backend;
use crate::core::Target;

/// 6502 assembly backend
pub struct Mos6502Backend {
    target: Mos6502Target,
}

impl Mos6502Backend {
    pub fn new() -> Self {
        Self { target: Mos6502Target::new() }
    }
}

impl Default for Mos6502Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Mos6502Backend {
    fn name(&self) -> &'static str {
        "mos6502"
    }

    fn description(&self) -> &'static str {
        "MOS 6502"
    }

    fn extension(&self) -> &'static str {
        "s"
    }

    fn target(&self) -> &dyn Target {
        &self.target
    }
}
