//! Variables, usage history and live ranges

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::anchor::Anchor;
use super::register::RegisterId;
use crate::types::IrType;

/// Position of an instruction in its function
pub type Address = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub usize);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalSlotId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Read,
    Write,
}

/// Read/write flags of one variable at one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub read: bool,
    pub write: bool,
}

impl Usage {
    pub fn add(&mut self, kind: UsageKind) {
        match kind {
            UsageKind::Read => self.read = true,
            UsageKind::Write => self.write = true,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read && !self.write
    }
}

/// Where a variable lives once allocation is done
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Storage {
    #[default]
    Unassigned,
    Register(RegisterId),
    Local(LocalSlotId),
    Static(String),
    Constant(i64),
}

#[derive(Debug, Clone)]
pub struct Variable {
    id: VariableId,
    name: String,
    ty: IrType,
    temporary: bool,
    global: bool,
    storage: Storage,
    usages: BTreeMap<Address, Usage>,
    intersections: BTreeSet<VariableId>,
    spans: Vec<(Address, Address)>,
}

impl Variable {
    pub fn new(id: VariableId, name: impl Into<String>, ty: IrType, temporary: bool) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            temporary,
            global: false,
            storage: Storage::Unassigned,
            usages: BTreeMap::new(),
            intersections: BTreeSet::new(),
            spans: Vec::new(),
        }
    }

    /// A module-level variable seen from inside a function
    pub fn global(id: VariableId, name: impl Into<String>, ty: IrType) -> Self {
        let name = name.into();
        let mut variable = Self::new(id, name.clone(), ty, false);
        variable.global = true;
        variable.storage = Storage::Static(name);
        variable
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &IrType {
        &self.ty
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    // ==================== Usages ====================

    pub fn add_usage(&mut self, address: Address, kind: UsageKind) {
        self.usages.entry(address).or_default().add(kind);
    }

    pub fn usages(&self) -> &BTreeMap<Address, Usage> {
        &self.usages
    }

    pub fn usage_at(&self, address: Address) -> Option<Usage> {
        self.usages.get(&address).copied()
    }

    pub fn has_usages(&self) -> bool {
        !self.usages.is_empty()
    }

    pub fn usage_count(&self) -> usize {
        self.usages.len()
    }

    pub fn first_address(&self) -> Option<Address> {
        self.usages.keys().next().copied()
    }

    pub fn last_address(&self) -> Option<Address> {
        self.usages.keys().next_back().copied()
    }

    /// Distance from first to last usage, `None` when unused
    pub fn range(&self) -> Option<usize> {
        Some(self.last_address()? - self.first_address()?)
    }

    /// Whether `address` lies within [first, last]
    pub fn is_in_range(&self, address: Address) -> bool {
        match (self.first_address(), self.last_address()) {
            (Some(first), Some(last)) => first <= address && address <= last,
            _ => false,
        }
    }

    // ==================== Storage ====================

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn register(&self) -> Option<RegisterId> {
        match self.storage {
            Storage::Register(register) => Some(register),
            _ => None,
        }
    }

    pub fn local_slot(&self) -> Option<LocalSlotId> {
        match self.storage {
            Storage::Local(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.storage, Storage::Static(_))
    }

    pub fn is_unassigned(&self) -> bool {
        matches!(self.storage, Storage::Unassigned)
    }

    pub fn set_register(&mut self, register: RegisterId) {
        assert!(
            self.is_unassigned(),
            "variable {} already has storage {:?}", self.name, self.storage
        );
        self.storage = Storage::Register(register);
    }

    pub fn set_local(&mut self, slot: LocalSlotId) {
        assert!(
            self.is_unassigned(),
            "variable {} already has storage {:?}", self.name, self.storage
        );
        self.storage = Storage::Local(slot);
    }

    /// Move the variable to plain memory. A register binding is dropped;
    /// a local slot may not be overridden.
    pub fn set_static(&mut self, label: impl Into<String>) {
        assert!(
            !matches!(self.storage, Storage::Local(_) | Storage::Constant(_)),
            "variable {} cannot become static from {:?}", self.name, self.storage
        );
        self.storage = Storage::Static(label.into());
    }

    pub fn set_constant(&mut self, value: i64) {
        assert!(
            self.is_unassigned(),
            "variable {} already has storage {:?}", self.name, self.storage
        );
        self.storage = Storage::Constant(value);
    }

    // ==================== Intersections ====================

    pub fn intersections(&self) -> &BTreeSet<VariableId> {
        &self.intersections
    }

    pub fn intersects(&self, other: VariableId) -> bool {
        self.intersections.contains(&other)
    }

    /// Whether the live ranges of two used variables overlap by more than
    /// a shared boundary address
    pub fn overlaps(&self, other: &Variable) -> bool {
        let (Some(first), Some(last)) = (self.first_address(), self.last_address()) else {
            panic!("variable {} has no usages", self.name);
        };
        let (Some(other_first), Some(other_last)) = (other.first_address(), other.last_address()) else {
            panic!("variable {} has no usages", other.name);
        };
        !(other_first >= last || other_last <= first)
    }

    /// Whether an anchor placed strictly inside the live range is reached
    /// from outside of it
    pub fn crosses_anchor(&self, anchors: &[Anchor]) -> bool {
        let (Some(first), Some(last)) = (self.first_address(), self.last_address()) else {
            return false;
        };
        anchors.iter().any(|anchor| match anchor.address() {
            Some(address) if first < address && address < last => anchor
                .origins()
                .iter()
                .any(|&origin| origin < first || origin > last),
            _ => false,
        })
    }

    /// Demote the variable to static memory when an anchor enters its live
    /// range from outside. Returns whether it was demoted.
    pub fn test_anchors(&mut self, anchors: &[Anchor], label: impl FnOnce(&str) -> String) -> bool {
        if !self.crosses_anchor(anchors) {
            return false;
        }
        let label = label(&self.name);
        self.set_static(label);
        true
    }

    // ==================== Live spans ====================

    /// Compute the spans over which the variable's value must survive.
    ///
    /// For each pair of consecutive usages (u, n) where n reads the value,
    /// the value is live from u (from u + 1 when u writes it) up to n - 1.
    /// When n is the last usage and is an unconditional jump, the value is
    /// carried along the jump and the span reaches n itself.
    pub fn compute_live_spans(&mut self, is_unconditional_jump: impl Fn(Address) -> bool) {
        let entries: Vec<(Address, Usage)> = self.usages.iter().map(|(&a, &u)| (a, u)).collect();
        let last = entries.last().map(|&(address, _)| address);
        let mut spans = Vec::new();

        for pair in entries.windows(2) {
            let (current, usage) = pair[0];
            let (next, next_usage) = pair[1];
            if !next_usage.read {
                continue;
            }
            let start = if usage.write { current + 1 } else { current };
            let end = if Some(next) == last && is_unconditional_jump(next) {
                next
            } else {
                next - 1
            };
            if start <= end {
                spans.push((start, end));
            }
        }

        self.spans = spans;
    }

    pub fn live_spans(&self) -> &[(Address, Address)] {
        &self.spans
    }

    /// Whether the value must survive the instruction at `address`
    pub fn is_live_through(&self, address: Address) -> bool {
        self.spans
            .iter()
            .any(|&(start, end)| start <= address && address <= end)
    }
}

/// Add a symmetric intersection edge between two variables when their live
/// ranges overlap. Returns whether an edge was added.
pub fn make_intersection(variables: &mut [Variable], a: VariableId, b: VariableId) -> bool {
    if a == b || !variables[a.0].overlaps(&variables[b.0]) {
        return false;
    }
    variables[a.0].intersections.insert(b);
    variables[b.0].intersections.insert(a);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::anchor::AnchorId;

    fn used(id: usize, usages: &[(Address, UsageKind)]) -> Variable {
        let mut variable = Variable::new(VariableId(id), format!("v{}", id), IrType::byte(), false);
        for &(address, kind) in usages {
            variable.add_usage(address, kind);
        }
        variable
    }

    fn placed(id: usize, address: Address, origins: &[Address]) -> Anchor {
        let mut anchor = Anchor::new(AnchorId(id));
        for &origin in origins {
            anchor.add_origin(origin);
        }
        anchor.set_address(address);
        anchor
    }

    #[test]
    fn test_add_usage_merges_flags() {
        let mut v = used(0, &[(3, UsageKind::Read)]);
        v.add_usage(3, UsageKind::Write);
        v.add_usage(3, UsageKind::Read);
        assert_eq!(v.usage_at(3), Some(Usage { read: true, write: true }));
        assert_eq!(v.usage_count(), 1);
    }

    #[test]
    fn test_range() {
        let v = used(0, &[(7, UsageKind::Read), (2, UsageKind::Write)]);
        assert_eq!(v.first_address(), Some(2));
        assert_eq!(v.last_address(), Some(7));
        assert_eq!(v.range(), Some(5));
        assert_eq!(used(1, &[]).range(), None);
        assert_eq!(used(2, &[(4, UsageKind::Write)]).range(), Some(0));
    }

    #[test]
    fn test_intersection_is_symmetric() {
        let mut vars = vec![
            used(0, &[(0, UsageKind::Write), (10, UsageKind::Read)]),
            used(1, &[(5, UsageKind::Write), (20, UsageKind::Read)]),
        ];
        assert!(make_intersection(&mut vars, VariableId(0), VariableId(1)));
        assert!(vars[0].intersects(VariableId(1)));
        assert!(vars[1].intersects(VariableId(0)));
    }

    #[test]
    fn test_touching_ranges_do_not_intersect() {
        let mut vars = vec![
            used(0, &[(0, UsageKind::Write), (5, UsageKind::Read)]),
            used(1, &[(5, UsageKind::Write), (9, UsageKind::Read)]),
            used(2, &[(10, UsageKind::Write), (15, UsageKind::Read)]),
        ];
        assert!(!make_intersection(&mut vars, VariableId(0), VariableId(1)));
        assert!(!make_intersection(&mut vars, VariableId(1), VariableId(0)));
        assert!(!make_intersection(&mut vars, VariableId(0), VariableId(2)));
        assert!(vars.iter().all(|v| v.intersections().is_empty()));
    }

    #[test]
    #[should_panic(expected = "has no usages")]
    fn test_overlap_requires_usages() {
        let a = used(0, &[]);
        let b = used(1, &[(1, UsageKind::Read)]);
        a.overlaps(&b);
    }

    #[test]
    fn test_anchor_from_outside_demotes() {
        // loop top at 3, back edge from 9, variable lives 2..6
        let mut v = used(0, &[(2, UsageKind::Write), (6, UsageKind::Read)]);
        let anchors = vec![placed(0, 3, &[9])];
        assert!(v.test_anchors(&anchors, |name| format!("f_{}", name)));
        assert_eq!(v.storage(), &Storage::Static("f_v0".to_string()));
    }

    #[test]
    fn test_anchor_from_inside_keeps_variable() {
        let mut v = used(0, &[(0, UsageKind::Write), (9, UsageKind::Read)]);
        let anchors = vec![placed(0, 3, &[8])];
        assert!(!v.test_anchors(&anchors, |name| name.to_string()));
        assert!(v.is_unassigned());
    }

    #[test]
    fn test_anchor_on_range_boundary_is_ignored() {
        let mut v = used(0, &[(3, UsageKind::Write), (6, UsageKind::Read)]);
        let anchors = vec![placed(0, 3, &[10]), placed(1, 6, &[0])];
        assert!(!v.test_anchors(&anchors, |name| name.to_string()));
    }

    #[test]
    fn test_static_overrides_register() {
        let mut v = used(0, &[(0, UsageKind::Read)]);
        v.set_register(RegisterId(2));
        v.set_static("x");
        assert!(v.is_static());
    }

    #[test]
    #[should_panic(expected = "already has storage")]
    fn test_register_and_slot_are_exclusive() {
        let mut v = used(0, &[(0, UsageKind::Read)]);
        v.set_register(RegisterId(1));
        v.set_local(LocalSlotId(0));
    }

    #[test]
    fn test_live_spans_skip_dead_gaps() {
        // written at 0, read at 4, rewritten at 6, read at 9
        let mut v = used(0, &[
            (0, UsageKind::Write),
            (4, UsageKind::Read),
            (6, UsageKind::Write),
            (9, UsageKind::Read),
        ]);
        v.compute_live_spans(|_| false);
        assert_eq!(v.live_spans(), &[(1, 3), (7, 8)]);
        assert!(!v.is_live_through(5));
        assert!(!v.is_live_through(4));
    }

    #[test]
    fn test_live_spans_read_only_start_is_protected() {
        let mut v = used(0, &[(0, UsageKind::Read), (3, UsageKind::Read)]);
        v.compute_live_spans(|_| false);
        assert_eq!(v.live_spans(), &[(0, 2)]);
    }

    #[test]
    fn test_live_spans_reach_terminal_jump() {
        // loop-carried: last read is the back edge at 7
        let mut v = used(0, &[(1, UsageKind::Write), (4, UsageKind::Read), (7, UsageKind::Read)]);
        v.compute_live_spans(|address| address == 7);
        assert_eq!(v.live_spans(), &[(2, 3), (4, 7)]);
    }

    #[test]
    fn test_live_spans_stop_before_last_plain_use() {
        let mut v = used(0, &[(1, UsageKind::Write), (5, UsageKind::Read)]);
        v.compute_live_spans(|address| address == 9);
        assert_eq!(v.live_spans(), &[(2, 4)]);
    }

    #[test]
    fn test_adjacent_write_then_read_has_no_span() {
        let mut v = used(0, &[(2, UsageKind::Write), (3, UsageKind::Read)]);
        v.compute_live_spans(|_| false);
        assert!(v.live_spans().is_empty());
    }
}
