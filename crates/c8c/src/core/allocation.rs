//! Register and local slot allocation

use std::cmp::Reverse;

use tracing::{debug, trace};

use super::function::Function;
use super::register::RegisterId;
use super::target::Target;
use super::variable::VariableId;

/// Order in which variables compete for storage: most used first, then
/// shortest range first
fn allocation_order(function: &Function, mut ids: Vec<VariableId>) -> Vec<VariableId> {
    ids.sort_by_key(|&id| {
        let variable = function.variable(id);
        (Reverse(variable.usage_count()), variable.range().unwrap_or(0), id)
    });
    ids
}

/// Greedy register assignment shared by the targets.
///
/// Each candidate takes the best scoring register that no intersecting
/// variable already occupies, provided no instruction in its range vetoes
/// the register and the score is not negative.
pub fn allocate_greedy(function: &mut Function, target: &dyn Target) {
    let catalog = target.registers();
    let pending: Vec<VariableId> = function
        .allocation_candidates()
        .into_iter()
        .filter(|&id| function.variable(id).is_unassigned())
        .collect();
    let order = allocation_order(function, pending);

    let mut assigned = 0;
    for id in order {
        let variable = function.variable(id);
        let taken: Vec<RegisterId> = variable
            .intersections()
            .iter()
            .filter_map(|&other| function.variable(other).register())
            .collect();

        let mut best: Option<(RegisterId, i32)> = None;
        for register in target.variable_registers(variable.ty()) {
            if taken.iter().any(|&t| catalog.conflicts(t, register)) {
                continue;
            }
            let Some(score) = function.register_adaptability(id, register, target) else {
                trace!(variable = variable.name(), register = catalog.name(register), "vetoed");
                continue;
            };
            if best.is_none_or(|(_, current)| score > current) {
                best = Some((register, score));
            }
        }

        match best {
            Some((register, score)) if score >= 0 => {
                trace!(
                    variable = function.variable(id).name(),
                    register = catalog.name(register),
                    score,
                    "register assigned"
                );
                function.variable_mut(id).set_register(register);
                assigned += 1;
            }
            _ => {}
        }
    }
    debug!(function = function.name(), assigned, "register allocation");
}

/// Give every used variable still without storage a local memory slot,
/// sharing slots of the same size between variables that never intersect
pub fn allocate_local_slots(function: &mut Function) {
    loop {
        let pending: Vec<VariableId> = function
            .variables()
            .iter()
            .filter(|v| v.is_unassigned() && v.has_usages())
            .map(|v| v.id())
            .collect();
        if pending.is_empty() {
            break;
        }

        for id in allocation_order(function, pending) {
            let size = function.variable(id).ty().size;
            let reusable = function
                .slots()
                .iter()
                .find(|slot| {
                    slot.size == size
                        && !function
                            .variable(id)
                            .intersections()
                            .iter()
                            .any(|&other| function.variable(other).local_slot() == Some(slot.id))
                })
                .map(|slot| slot.id);
            let slot = match reusable {
                Some(slot) => slot,
                None => function.add_slot(size),
            };
            function.variable_mut(id).set_local(slot);
            trace!(variable = function.variable(id).name(), slot = slot.0, "local slot assigned");
        }
    }
    debug!(function = function.name(), slots = function.slots().len(), "local slots");
}
