//! Assembly label naming shared by the core, the targets and the writer

use super::anchor::AnchorId;
use super::variable::LocalSlotId;

pub fn anchor_label(function: &str, anchor: AnchorId) -> String {
    format!("{}_L{}", function, anchor.0)
}

pub fn exit_label(function: &str) -> String {
    format!("{}_exit", function)
}

pub fn local_label(function: &str, slot: LocalSlotId) -> String {
    format!("{}_l{}", function, slot.0)
}

pub fn static_label(function: &str, name: &str) -> String {
    format!("{}_{}", function, name)
}

/// Memory home of parameter `index` when no register carries it
pub fn parameter_label(function: &str, index: usize) -> String {
    format!("{}_p{}", function, index)
}

/// Memory home of a return value no register can carry
pub fn result_label(function: &str) -> String {
    format!("{}_result", function)
}

/// Module-wide slot used by a reservation nested `depth` deep
pub fn save_label(depth: usize) -> String {
    format!("__save{}", depth)
}

pub fn string_label(index: usize) -> String {
    format!("__str{}", index)
}
