//! c8c - retargetable compiler for 8-bit CPUs
//!
//! This library compiles a small three-address language to assembly for
//! the Zilog Z80 and the MOS 6502 through one shared code generation core.
//!
//! ## Architecture
//!
//! The compiler is organized into:
//! - **Frontends** (`frontend/`): Parsing and lowering of source listings
//! - **IR** (`ir/`): Instruction kinds, builders and the module container
//! - **Core** (`core/`): Liveness, register allocation, reservations and
//!   save regions, parameterised by a `Target`
//! - **Backends** (`backend/`): Target descriptions and the assembly writer
//! - **Common** (`common/`): Shared infrastructure (errors, spans)
//! - **Types** (`types/`): Semantic types sized for 8-bit machines

pub mod common;
pub mod types;
pub mod core;
pub mod ir;
pub mod frontend;
pub mod backend;
pub mod driver;

// Re-exports for convenience
pub use common::{CompileError, CompileResult, DiagnosticReporter, Span};
pub use frontend::{Frontend, FrontendConfig, FrontendRegistry, CompileContext};
pub use backend::{Backend, BackendConfig, BackendRegistry, BackendOutput};
pub use driver::Pipeline;
