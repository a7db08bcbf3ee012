//! Three-address listing frontend
//!
//! This frontend handles:
//! - Lexing `.tac` source into tokens
//! - Parsing tokens into a small AST
//! - Lowering to the shared IR, resolving names and labels

pub mod ast;
pub mod lexer;
pub mod lower;
pub mod parser;

use std::path::Path;

use crate::common::CompileResult;
use crate::frontend::{CompileContext, Frontend, FrontendConfig};
use crate::ir::IrModule;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;

/// Three-address listing frontend
pub struct TacFrontend;

impl TacFrontend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TacFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend for TacFrontend {
    fn name(&self) -> &'static str {
        "tac"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".tac"]
    }

    fn compile(
        &self,
        source: &str,
        ctx: &CompileContext,
        config: &FrontendConfig,
    ) -> CompileResult<IrModule> {
        let result = compile_source(source, ctx, config);
        if let Err(e) = &result {
            ctx.reporter.report_error(ctx.file_id, e);
        }
        result
    }

    fn dump_tokens(&self, source: &str) -> CompileResult<String> {
        let tokens = Lexer::new(source).tokenize_all()?;
        let mut output = String::new();
        for token in &tokens {
            output.push_str(&format!("{:?}\n", token));
        }
        Ok(output)
    }

    fn dump_ast(&self, source: &str) -> CompileResult<String> {
        let program = Parser::new(source)?.parse()?;
        Ok(format!("{:#?}", program.items))
    }
}

fn compile_source(source: &str, ctx: &CompileContext, config: &FrontendConfig) -> CompileResult<IrModule> {
    if config.dump_tokens {
        let tokens = Lexer::new(source).tokenize_all()?;
        eprintln!("=== Tokens ===");
        for token in &tokens {
            eprintln!("{:?}", token);
        }
        eprintln!("=== End Tokens ===\n");
    }

    if config.verbose {
        eprintln!("Parsing {}...", ctx.filename);
    }
    let program = Parser::new(source)?.parse()?;

    if config.verbose {
        eprintln!("Lowering {} items for {}...", program.items.len(), ctx.target.name());
    }
    let name = Path::new(&ctx.filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("module");
    lower::lower(&program, name, ctx.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DiagnosticReporter;
    use crate::core::testing::ToyTarget;

    #[test]
    fn test_module_named_after_file() {
        let target = ToyTarget::new();
        let reporter = DiagnosticReporter::new();
        let ctx = CompileContext::new("src/blink.tac".to_string(), 0, &reporter, &target);
        let module = TacFrontend::new()
            .compile("fn main() { return; }", &ctx, &FrontendConfig::default())
            .unwrap();
        assert_eq!(module.name, "blink");
        assert!(module.function("main").is_some());
    }

    #[test]
    fn test_dump_tokens() {
        let dump = TacFrontend::new().dump_tokens("x = 1;").unwrap();
        assert_eq!(dump.lines().count(), 5);
    }
}
