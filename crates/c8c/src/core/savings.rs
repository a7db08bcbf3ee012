//! Save intervals: which register variables must be preserved around
//! which instructions, and how runs of instructions share one save

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::function::Function;
use super::instruction::Instruction;
use super::register::RegisterCatalog;
use super::variable::{Address, Variable, VariableId};

/// Mark every instruction that overwrites the register of a variable whose
/// value lives through it. Variables are visited by ascending range.
pub fn fill_savings(function: &mut Function, catalog: &RegisterCatalog) {
    let (variables, instructions) = function.split_mut();
    let mut order: Vec<&Variable> = variables
        .iter()
        .filter(|v| v.register().is_some() && v.has_usages())
        .collect();
    order.sort_by_key(|v| (v.range().unwrap_or(0), v.id()));

    for variable in order {
        fill_variable_savings(variable, instructions, catalog);
    }
}

fn fill_variable_savings(variable: &Variable, instructions: &mut [Instruction], catalog: &RegisterCatalog) {
    let Some(register) = variable.register() else {
        return;
    };
    for &(start, end) in variable.live_spans() {
        for instruction in &mut instructions[start..=end] {
            // nothing after an unconditional jump runs before its target
            if instruction.kind().is_unconditional_jump() {
                continue;
            }
            if instruction.is_register_changed(register, catalog) {
                // a restore after a branch would only run on the fall-through path
                assert!(
                    !instruction.kind().is_jump(),
                    "jump at {} overwrites live variable {}",
                    instruction.address(),
                    variable.name()
                );
                trace!(
                    variable = variable.name(),
                    address = instruction.address(),
                    "saved around instruction"
                );
                instruction.add_saving(variable.id());
            }
        }
    }
}

/// A run of instructions sharing one save before and one restore after
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRegion {
    pub start: Address,
    pub end: Address,
    pub variables: BTreeSet<VariableId>,
}

/// Group consecutive instructions with the same saving set. A region
/// never spans an anchor target, a jump, or an instruction that reads one
/// of the variables it protects.
pub fn save_regions(function: &Function) -> Vec<SaveRegion> {
    let anchored: BTreeSet<Address> = function
        .anchors()
        .iter()
        .filter_map(|anchor| anchor.address())
        .collect();
    let instructions = function.instructions();

    let mut regions = Vec::new();
    let mut current: Option<SaveRegion> = None;

    for instruction in instructions {
        let address = instruction.address();
        let saving = instruction.saving();
        assert!(
            saving.is_empty() || !instruction.kind().is_jump(),
            "jump at {} needs saving", address
        );

        let extends = current.as_ref().is_some_and(|region| {
            region.variables == *saving
                && !anchored.contains(&address)
                && !instructions[address - 1].kind().is_jump()
                && !instruction.kind().is_jump()
                && !region
                    .variables
                    .iter()
                    .any(|&v| function.variable(v).usage_at(address).is_some())
        });

        if extends {
            if let Some(region) = current.as_mut() {
                region.end = address;
            }
            continue;
        }
        regions.extend(current.take());
        if !saving.is_empty() {
            current = Some(SaveRegion { start: address, end: address, variables: saving.clone() });
        }
    }
    regions.extend(current);

    debug!(function = function.name(), regions = regions.len(), "save regions");
    regions
}
