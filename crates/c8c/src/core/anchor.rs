//! Deferred jump targets

use std::collections::BTreeSet;
use std::fmt;

use super::variable::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId(pub usize);

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A branch destination whose address is resolved after the jumps to it
/// have been emitted
#[derive(Debug, Clone)]
pub struct Anchor {
    id: AnchorId,
    origins: BTreeSet<Address>,
    address: Option<Address>,
}

impl Anchor {
    pub fn new(id: AnchorId) -> Self {
        Self { id, origins: BTreeSet::new(), address: None }
    }

    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// Record an instruction that jumps here
    pub fn add_origin(&mut self, address: Address) {
        self.origins.insert(address);
    }

    pub fn origins(&self) -> &BTreeSet<Address> {
        &self.origins
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn is_placed(&self) -> bool {
        self.address.is_some()
    }

    /// Place the anchor; an anchor is placed exactly once
    pub fn set_address(&mut self, address: Address) {
        if let Some(previous) = self.address {
            panic!("anchor {} already placed at {}", self.id, previous);
        }
        self.address = Some(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_once() {
        let mut anchor = Anchor::new(AnchorId(0));
        assert!(!anchor.is_placed());
        anchor.add_origin(7);
        anchor.add_origin(2);
        anchor.add_origin(7);
        anchor.set_address(4);
        assert_eq!(anchor.address(), Some(4));
        assert_eq!(anchor.origins().iter().copied().collect::<Vec<_>>(), vec![2, 7]);
    }

    #[test]
    #[should_panic(expected = "already placed")]
    fn test_second_placement_is_rejected() {
        let mut anchor = Anchor::new(AnchorId(3));
        anchor.set_address(1);
        anchor.set_address(2);
    }
}
