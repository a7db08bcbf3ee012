//! IR modules (one per translation unit)

use std::fmt;

use crate::core::{Function, Target};
use crate::types::IrType;

/// Global variable in IR
#[derive(Debug, Clone)]
pub struct IrGlobal {
    pub name: String,
    pub ty: IrType,
    pub init: Option<Vec<u8>>,
}

/// Function defined in another module
#[derive(Debug, Clone)]
pub struct IrExtern {
    pub name: String,
    pub parameters: Vec<IrType>,
    pub return_type: IrType,
}

/// String literal placed in the data segment
#[derive(Debug, Clone)]
pub struct IrString {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// IR module (translation unit)
#[derive(Debug, Default)]
pub struct IrModule {
    pub name: String,
    pub globals: Vec<IrGlobal>,
    pub externs: Vec<IrExtern>,
    pub strings: Vec<IrString>,
    pub functions: Vec<Function>,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Run the allocation pipeline on every function
    pub fn compile(&mut self, target: &dyn Target) {
        for function in &mut self.functions {
            function.compile(target);
        }
    }

    /// Number of reservation save slots the module's code uses
    pub fn save_slots(&self) -> usize {
        self.functions.iter().map(Function::max_save_depth).max().unwrap_or(0)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(f, "global {}: {}", global.name, global.ty)?;
        }
        for external in &self.externs {
            let parameters: Vec<String> = external.parameters.iter().map(|p| p.to_string()).collect();
            writeln!(
                f,
                "extern {}({}) -> {}",
                external.name,
                parameters.join(", "),
                external.return_type
            )?;
        }
        for string in &self.strings {
            writeln!(f, "{}: \"{}\"", string.label, String::from_utf8_lossy(&string.bytes).escape_default())?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
