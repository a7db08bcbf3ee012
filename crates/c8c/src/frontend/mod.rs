//! Frontend trait and implementations
//!
//! Frontends are responsible for:
//! 1. Lexing source code into tokens
//! 2. Parsing tokens into an AST
//! 3. Checking names, labels and sizes
//! 4. Lowering to the shared IR through the builders

pub mod tac;

use crate::common::{CompileResult, DiagnosticReporter};
use crate::core::Target;
use crate::ir::IrModule;

pub use tac::TacFrontend;

/// Configuration options passed to frontends
#[derive(Debug, Clone, Default)]
pub struct FrontendConfig {
    pub dump_tokens: bool,
    pub verbose: bool,
}

/// Compilation context providing access to diagnostics, file info and
/// the target whose calling convention parameters are bound to
pub struct CompileContext<'a> {
    pub filename: String,
    pub file_id: usize,
    pub reporter: &'a DiagnosticReporter,
    pub target: &'a dyn Target,
}

impl<'a> CompileContext<'a> {
    pub fn new(filename: String, file_id: usize, reporter: &'a DiagnosticReporter, target: &'a dyn Target) -> Self {
        Self { filename, file_id, reporter, target }
    }
}

/// Trait for language frontends
///
/// A frontend is responsible for taking source code and producing IR.
pub trait Frontend: Send + Sync {
    /// The name of this frontend (e.g., "tac")
    fn name(&self) -> &'static str;

    /// File extensions this frontend handles (e.g., &[".tac"])
    fn extensions(&self) -> &'static [&'static str];

    /// Compile source code to IR
    fn compile(
        &self,
        source: &str,
        ctx: &CompileContext,
        config: &FrontendConfig,
    ) -> CompileResult<IrModule>;

    /// Optional: dump tokens for debugging
    fn dump_tokens(&self, source: &str) -> CompileResult<String> {
        let _ = source;
        Ok(String::new())
    }

    /// Optional: dump AST for debugging
    fn dump_ast(&self, source: &str) -> CompileResult<String> {
        let _ = source;
        Ok(String::new())
    }
}

/// Registry of available frontends
pub struct FrontendRegistry {
    frontends: Vec<Box<dyn Frontend>>,
}

impl FrontendRegistry {
    pub fn new() -> Self {
        Self { frontends: Vec::new() }
    }

    /// Registry with every frontend this crate ships
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TacFrontend::new()));
        registry
    }

    pub fn register(&mut self, frontend: Box<dyn Frontend>) {
        self.frontends.push(frontend);
    }

    pub fn find_by_extension(&self, ext: &str) -> Option<&dyn Frontend> {
        self.frontends.iter()
            .find(|f| f.extensions().contains(&ext))
            .map(|f| f.as_ref())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&dyn Frontend> {
        self.frontends.iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    pub fn list(&self) -> impl Iterator<Item = &dyn Frontend> {
        self.frontends.iter().map(|f| f.as_ref())
    }
}

impl Default for FrontendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = FrontendRegistry::with_defaults();
        assert_eq!(registry.find_by_extension(".tac").map(|f| f.name()), Some("tac"));
        assert!(registry.find_by_extension(".c").is_none());
        assert!(registry.find_by_name("tac").is_some());
        assert_eq!(registry.list().count(), 1);
    }
}
