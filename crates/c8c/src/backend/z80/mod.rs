//! Z80 code generation backend
//!
//! This backend emits Zilog Z80 assembly in the relocatable `cseg`/`dseg`
//! dialect understood by the common CP/M-era assemblers.

mod emit;
mod registers;

pub use emit::Z80Target;
pub use registers::*;

use crate::backend::Backend;
use crate::core::Target;

/// Z80 assembly backend
pub struct Z80Backend {
    target: Z80Target,
}

impl Z80Backend {
    pub fn new() -> Self {
        Self { target: Z80Target::new() }
    }
}

impl Default for Z80Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Z80Backend {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn description(&self) -> &'static str {
        "Zilog Z80"
    }

    fn target(&self) -> &dyn Target {
        &self.target
    }
}
