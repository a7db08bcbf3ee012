//! Assembly listing writer
//!
//! Lays out a compiled module with the syntax of its target: externals,
//! the code segment with every function, then the data segment holding
//! everything the code refers to by label.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::{labels, save_regions, Address, Function, RegisterId, Storage, Target, VariableId};
use crate::ir::IrModule;
use crate::types::IrType;

/// Render `module`, whose functions have been compiled for `target`
pub fn write_module(module: &IrModule, target: &dyn Target) -> String {
    let mut writer = AsmWriter::new(target);
    writer.line(target.comment(&format!("module {} for {}", module.name, target.name())));

    for external in &module.externs {
        writer.line(target.extern_symbol(&external.name));
        for label in memory_interface(target, &external.name, &external.parameters, &external.return_type) {
            writer.line(target.extern_symbol(&label));
        }
    }

    writer.blank();
    writer.lines(target.code_segment());
    for function in &module.functions {
        writer.function(function);
    }

    writer.blank();
    writer.lines(target.data_segment());
    for function in &module.functions {
        writer.function_data(function);
    }
    for global in &module.globals {
        writer.line(target.public_symbol(&global.name));
        match &global.init {
            Some(bytes) => writer.lines(target.define_bytes(&global.name, bytes)),
            None => writer.lines(target.reserve_bytes(&global.name, global.ty.size)),
        }
    }
    for string in &module.strings {
        writer.lines(target.define_bytes(&string.label, &string.bytes));
    }
    for depth in 0..module.save_slots() {
        writer.lines(target.reserve_bytes(&labels::save_label(depth), 2));
    }
    let runtime = target.runtime_data();
    if !runtime.is_empty() {
        writer.lines(target.runtime_segment());
    }
    for (label, size) in runtime {
        writer.lines(target.reserve_bytes(&label, size));
    }

    debug!(module = %module.name, lines = writer.count, "assembly written");
    writer.text
}

/// Labels through which callers reach a function's memory parameters and
/// memory return value
fn memory_interface(target: &dyn Target, function: &str, parameters: &[IrType], return_type: &IrType) -> Vec<String> {
    let mut labels: Vec<String> = parameters
        .iter()
        .enumerate()
        .filter(|(index, ty)| target.parameter_register(*index, ty).is_none())
        .map(|(index, _)| labels::parameter_label(function, index))
        .collect();
    if !return_type.is_void() && target.return_register(return_type).is_none() {
        labels.push(labels::result_label(function));
    }
    labels
}

/// Every instruction with the code emitted for it, for `--dump-ir`
pub fn annotated_listing(module: &IrModule) -> String {
    let mut text = String::new();
    for function in &module.functions {
        text.push_str(&format!("function {}:\n", function.name()));
        for line in function.prologue() {
            text.push_str(&format!("        {}\n", line));
        }
        for instruction in function.instructions() {
            text.push_str(&format!("  {}\n", instruction));
            for line in instruction.codes() {
                text.push_str(&format!("        {}\n", line));
            }
        }
    }
    text
}

struct AsmWriter<'t> {
    target: &'t dyn Target,
    text: String,
    count: usize,
}

impl<'t> AsmWriter<'t> {
    fn new(target: &'t dyn Target) -> Self {
        Self { target, text: String::new(), count: 0 }
    }

    fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
        self.count += 1;
    }

    fn lines(&mut self, lines: Vec<String>) {
        for line in lines {
            self.line(line);
        }
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn code(&mut self, lines: &[String]) {
        for line in lines {
            self.line(format!("\t{}", line));
        }
    }

    fn function(&mut self, function: &Function) {
        let target = self.target;
        let name = function.name();
        self.blank();
        self.line(target.public_symbol(name));
        self.line(target.label(name));
        self.code(function.prologue());

        let mut anchors: BTreeMap<Address, Vec<String>> = BTreeMap::new();
        for anchor in function.anchors() {
            if let Some(address) = anchor.address() {
                anchors.entry(address).or_default().push(labels::anchor_label(name, anchor.id()));
            }
        }

        let regions = save_regions(function);
        let mut starts: BTreeMap<Address, Vec<RegisterId>> = BTreeMap::new();
        let mut ends: BTreeMap<Address, Vec<RegisterId>> = BTreeMap::new();
        for region in &regions {
            let registers = self.saved_units(function, region.variables.iter().copied());
            starts.insert(region.start, registers.clone());
            ends.insert(region.end, registers);
        }

        for instruction in function.instructions() {
            let address = instruction.address();
            if let Some(names) = anchors.get(&address) {
                for label in names {
                    self.line(target.label(label));
                }
            }
            if let Some(registers) = starts.get(&address) {
                self.code(&target.region_save(registers));
            }
            self.code(instruction.codes());
            if let Some(registers) = ends.get(&address) {
                self.code(&target.region_restore(registers));
            }
        }

        self.line(target.label(&labels::exit_label(name)));
        self.code(&target.return_code());
    }

    /// Save units covering the registers of `variables`, each once
    fn saved_units(&self, function: &Function, variables: impl Iterator<Item = VariableId>) -> Vec<RegisterId> {
        let mut units = Vec::new();
        for variable in variables {
            if let Some(register) = function.variable(variable).register() {
                let unit = self.target.save_unit(register);
                if !units.contains(&unit) {
                    units.push(unit);
                }
            }
        }
        units
    }

    fn function_data(&mut self, function: &Function) {
        let target = self.target;
        let name = function.name();

        let parameter_types: Vec<IrType> = function
            .parameters()
            .iter()
            .map(|parameter| function.variable(parameter.variable).ty().clone())
            .collect();
        let interface = memory_interface(target, name, &parameter_types, function.return_type());
        for label in &interface {
            self.line(target.public_symbol(label));
        }

        for slot in function.slots() {
            self.lines(target.reserve_bytes(&labels::local_label(name, slot.id), slot.size));
        }

        let mut statics: BTreeSet<&str> = BTreeSet::new();
        for variable in function.variables() {
            if variable.is_global() {
                continue;
            }
            if let Storage::Static(label) = variable.storage() {
                if statics.insert(label.as_str()) {
                    self.lines(target.reserve_bytes(label, variable.ty().size));
                }
            }
        }

        let result = labels::result_label(name);
        if interface.contains(&result) {
            self.lines(target.reserve_bytes(&result, function.return_type().size));
        }
    }
}
