//! Backend trait and implementations
//!
//! Backends are responsible for:
//! 1. Supplying the `Target` the frontend binds calling conventions to
//! 2. Running register allocation and code emission over the module
//! 3. Writing the assembly listing

pub mod mos6502;
pub mod writer;
pub mod z80;

use crate::common::CompileResult;
use crate::core::Target;
use crate::ir::IrModule;
use std::path::Path;

pub use mos6502::Mos6502Backend;
pub use z80::Z80Backend;

/// Configuration options for backends
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Print every instruction with the code emitted for it
    pub dump_ir: bool,
    /// Print the storage chosen for every variable
    pub dump_allocation: bool,
    pub verbose: bool,
}

/// Output from a backend: one assembly listing per module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    text: String,
}

impl BackendOutput {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.text)
    }

    pub fn as_text(&self) -> &str {
        &self.text
    }
}

/// Trait for code generation backends
pub trait Backend: Send + Sync {
    /// The name of this backend (e.g., "z80", "mos6502")
    fn name(&self) -> &'static str;

    /// Target architecture description
    fn description(&self) -> &'static str;

    /// Default extension of the listing
    fn extension(&self) -> &'static str {
        "asm"
    }

    fn target(&self) -> &dyn Target;

    /// Allocate, emit and write `module`. The module must have been built
    /// against [`Backend::target`].
    fn generate(&self, module: &mut IrModule, config: &BackendConfig) -> CompileResult<BackendOutput> {
        let target = self.target();
        if config.verbose {
            eprintln!("Allocating registers for {} functions...", module.functions.len());
        }
        module.compile(target);

        if config.dump_allocation {
            eprintln!("=== Allocation ===");
            for function in &module.functions {
                eprint!("{}", function.allocation_report(target.registers()));
            }
            eprintln!("=== End Allocation ===\n");
        }
        if config.dump_ir {
            eprintln!("=== Emitted IR ===");
            eprint!("{}", writer::annotated_listing(module));
            eprintln!("=== End Emitted IR ===\n");
        }

        if config.verbose {
            eprintln!("Writing {} assembly...", self.description());
        }
        Ok(BackendOutput::new(writer::write_module(module, target)))
    }
}

/// Registry of available backends
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    /// Registry with every backend this crate ships
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(Z80Backend::new()));
        registry.register(Box::new(Mos6502Backend::new()));
        registry
    }

    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&dyn Backend> {
        self.backends.iter()
            .find(|b| b.name() == name)
            .map(|b| b.as_ref())
    }

    pub fn default_backend(&self) -> Option<&dyn Backend> {
        self.backends.first().map(|b| b.as_ref())
    }

    pub fn list(&self) -> impl Iterator<Item = &dyn Backend> {
        self.backends.iter().map(|b| b.as_ref())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.default_backend().map(|b| b.name()), Some("z80"));
        assert_eq!(registry.find_by_name("mos6502").map(|b| b.target().name()), Some("mos6502"));
        assert!(registry.find_by_name("arm").is_none());
        assert_eq!(registry.list().count(), 2);
    }
}
