//! Compilation driver and pipeline orchestration

use crate::backend::{Backend, BackendConfig, BackendOutput, BackendRegistry};
use crate::common::{CompileError, CompileResult, DiagnosticReporter};
use crate::frontend::{CompileContext, Frontend, FrontendConfig, FrontendRegistry};
use crate::ir::IrModule;
use std::path::Path;

/// Compilation pipeline that coordinates frontends and backends
pub struct Pipeline {
    frontends: FrontendRegistry,
    backends: BackendRegistry,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            frontends: FrontendRegistry::new(),
            backends: BackendRegistry::new(),
        }
    }

    /// Pipeline knowing every frontend and backend this crate ships
    pub fn with_defaults() -> Self {
        Self {
            frontends: FrontendRegistry::with_defaults(),
            backends: BackendRegistry::with_defaults(),
        }
    }

    pub fn register_frontend(&mut self, frontend: Box<dyn Frontend>) {
        self.frontends.register(frontend);
    }

    pub fn register_backend(&mut self, backend: Box<dyn Backend>) {
        self.backends.register(backend);
    }

    pub fn frontends(&self) -> &FrontendRegistry {
        &self.frontends
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Look a frontend up by name, or by the extension of `filename`
    pub fn frontend_for(&self, filename: &str, frontend_name: Option<&str>) -> CompileResult<&dyn Frontend> {
        let frontend = if let Some(name) = frontend_name {
            self.frontends.find_by_name(name)
        } else {
            // Auto-detect from file extension
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();
            self.frontends.find_by_extension(&ext)
        };

        frontend.ok_or_else(|| CompileError::codegen(format!("no frontend found for file: {}", filename)))
    }

    pub fn backend(&self, backend_name: &str) -> CompileResult<&dyn Backend> {
        self.backends
            .find_by_name(backend_name)
            .ok_or_else(|| CompileError::backend(format!("backend not found: {}", backend_name)))
    }

    /// Compile source code to IR bound to the calling convention of
    /// `backend_name`
    #[allow(clippy::too_many_arguments)]
    pub fn compile_source(
        &self,
        source: &str,
        filename: &str,
        frontend_name: Option<&str>,
        backend_name: &str,
        config: &FrontendConfig,
        reporter: &DiagnosticReporter,
        file_id: usize,
    ) -> CompileResult<IrModule> {
        let frontend = self.frontend_for(filename, frontend_name)?;
        let backend = self.backend(backend_name)?;
        let ctx = CompileContext::new(filename.to_string(), file_id, reporter, backend.target());
        frontend.compile(source, &ctx, config)
    }

    /// Allocate, emit and write a module with the specified backend. The
    /// module must have been compiled for the same backend.
    pub fn generate_output(
        &self,
        module: &mut IrModule,
        backend_name: &str,
        config: &BackendConfig,
    ) -> CompileResult<BackendOutput> {
        self.backend(backend_name)?.generate(module, config)
    }

    /// Source text to assembly text in one step, with default settings
    pub fn compile_to_assembly(&self, source: &str, filename: &str, backend_name: &str) -> CompileResult<String> {
        let mut reporter = DiagnosticReporter::new();
        let file_id = reporter.add_file(filename, source);
        let mut module = self.compile_source(
            source,
            filename,
            None,
            backend_name,
            &FrontendConfig::default(),
            &reporter,
            file_id,
        )?;
        let output = self.generate_output(&mut module, backend_name, &BackendConfig::default())?;
        Ok(output.as_text().to_string())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
