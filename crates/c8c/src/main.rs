//! c8c - retargetable compiler for 8-bit CPUs
//!
//! Usage: c8c [OPTIONS] <input> -o <output>

use anyhow::{Context, Result};
use c8_compiler::backend::BackendConfig;
use c8_compiler::common::DiagnosticReporter;
use c8_compiler::driver::Pipeline;
use c8_compiler::frontend::FrontendConfig;
use clap::{Parser as ClapParser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::process;

/// Target CPU
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Default)]
enum Cpu {
    /// Zilog Z80
    #[default]
    #[value(name = "z80")]
    Z80,
    /// MOS 6502
    #[value(name = "mos6502")]
    Mos6502,
}

impl Cpu {
    fn backend_name(self) -> &'static str {
        match self {
            Cpu::Z80 => "z80",
            Cpu::Mos6502 => "mos6502",
        }
    }
}

#[derive(ClapParser, Debug)]
#[command(name = "c8c")]
#[command(version)]
#[command(about = "Retargetable compiler for 8-bit CPUs (Z80, MOS 6502)", long_about = None)]
struct Args {
    /// Input source file (.tac)
    #[arg(required = true)]
    input: PathBuf,

    /// Output assembly file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target CPU
    #[arg(short, long, value_enum, default_value = "z80")]
    target: Cpu,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Dump tokens (for debugging)
    #[arg(long)]
    dump_tokens: bool,

    /// Dump the parsed program (for debugging)
    #[arg(long)]
    dump_ast: bool,

    /// Dump every instruction with the code emitted for it
    #[arg(long)]
    dump_ir: bool,

    /// Dump the storage chosen for every variable
    #[arg(long)]
    dump_allocation: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let filename = args.input.display().to_string();

    let mut reporter = DiagnosticReporter::new();
    let file_id = reporter.add_file(&filename, &source);

    let pipeline = Pipeline::with_defaults();
    let backend_name = args.target.backend_name();
    let backend = pipeline.backend(backend_name)?;

    let output_path = args.output.clone().unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension(backend.extension());
        path
    });

    if args.verbose {
        eprintln!(
            "Compiling {} -> {} ({})",
            args.input.display(),
            output_path.display(),
            backend.description()
        );
    }

    if args.dump_ast {
        let ast = pipeline.frontend_for(&filename, None)?.dump_ast(&source)?;
        eprintln!("=== AST ===\n{}\n=== End AST ===\n", ast);
    }

    let frontend_config = FrontendConfig {
        dump_tokens: args.dump_tokens,
        verbose: args.verbose,
    };
    let mut module = pipeline.compile_source(
        &source,
        &filename,
        None,
        backend_name,
        &frontend_config,
        &reporter,
        file_id,
    )?;

    let backend_config = BackendConfig {
        dump_ir: args.dump_ir,
        dump_allocation: args.dump_allocation,
        verbose: args.verbose,
    };
    let output = pipeline.generate_output(&mut module, backend_name, &backend_config)?;

    output
        .write_to(&output_path)
        .with_context(|| format!("cannot write {}", output_path.display()))?;

    if args.verbose {
        eprintln!("Successfully compiled to {}", output_path.display());
    }

    Ok(())
}
