//! Physical registers and their overlap relation
//!
//! A wide register lists the narrow registers it is made of. Two registers
//! conflict when they are the same register or one contains the other, so
//! `HL` conflicts with `H` and `L` but `H` does not conflict with `L`.

use std::fmt;

/// Index of a register in its target's catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(pub u8);

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A physical register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub id: RegisterId,
    pub name: &'static str,
    /// Width in bytes
    pub width: usize,
    /// Sub-registers, low byte first
    pub parts: Vec<RegisterId>,
}

impl Register {
    /// An 8-bit register
    pub fn byte(id: u8, name: &'static str) -> Self {
        Self { id: RegisterId(id), name, width: 1, parts: Vec::new() }
    }

    /// A 16-bit register made of two addressable halves
    pub fn pair(id: u8, name: &'static str, low: u8, high: u8) -> Self {
        Self {
            id: RegisterId(id),
            name,
            width: 2,
            parts: vec![RegisterId(low), RegisterId(high)],
        }
    }

    /// A 16-bit register whose halves cannot be addressed
    pub fn word(id: u8, name: &'static str) -> Self {
        Self { id: RegisterId(id), name, width: 2, parts: Vec::new() }
    }

    pub fn is_byte(&self) -> bool {
        self.width == 1
    }

    pub fn contains(&self, other: RegisterId) -> bool {
        self.parts.contains(&other)
    }
}

/// The complete register set of a target
#[derive(Debug, Clone)]
pub struct RegisterCatalog {
    registers: Vec<Register>,
}

impl RegisterCatalog {
    pub fn new(registers: Vec<Register>) -> Self {
        for (index, register) in registers.iter().enumerate() {
            assert_eq!(
                register.id.0 as usize, index,
                "register {} is out of catalog order", register.name
            );
        }
        Self { registers }
    }

    pub fn get(&self, id: RegisterId) -> &Register {
        &self.registers[id.0 as usize]
    }

    pub fn name(&self, id: RegisterId) -> &'static str {
        self.get(id).name
    }

    pub fn width(&self, id: RegisterId) -> usize {
        self.get(id).width
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    pub fn by_name(&self, name: &str) -> Option<RegisterId> {
        self.registers
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.id)
    }

    /// Whether writing one register can disturb the other
    pub fn conflicts(&self, a: RegisterId, b: RegisterId) -> bool {
        a == b || self.get(a).contains(b) || self.get(b).contains(a)
    }

    /// `id` together with its parts
    pub fn covered(&self, id: RegisterId) -> Vec<RegisterId> {
        let mut covered = vec![id];
        covered.extend(self.get(id).parts.iter().copied());
        covered
    }

    /// The register holding byte `index` of `id`
    pub fn byte_part(&self, id: RegisterId, index: usize) -> Option<RegisterId> {
        let register = self.get(id);
        if register.is_byte() {
            return (index == 0).then_some(id);
        }
        register.parts.get(index).copied()
    }

    /// The wider register that contains `id`, if any
    pub fn container(&self, id: RegisterId) -> Option<RegisterId> {
        self.registers.iter().find(|r| r.contains(id)).map(|r| r.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RegisterCatalog {
        RegisterCatalog::new(vec![
            Register::byte(0, "a"),
            Register::byte(1, "h"),
            Register::byte(2, "l"),
            Register::pair(3, "hl", 2, 1),
            Register::word(4, "ix"),
        ])
    }

    #[test]
    fn test_conflicts_are_direction_aware() {
        let c = catalog();
        let (h, l, hl) = (RegisterId(1), RegisterId(2), RegisterId(3));
        assert!(c.conflicts(hl, h));
        assert!(c.conflicts(h, hl));
        assert!(c.conflicts(l, hl));
        assert!(!c.conflicts(h, l));
        assert!(!c.conflicts(RegisterId(0), hl));
        assert!(!c.conflicts(RegisterId(4), hl));
    }

    #[test]
    fn test_byte_parts() {
        let c = catalog();
        assert_eq!(c.byte_part(RegisterId(3), 0), Some(RegisterId(2)));
        assert_eq!(c.byte_part(RegisterId(3), 1), Some(RegisterId(1)));
        assert_eq!(c.byte_part(RegisterId(4), 1), None);
        assert_eq!(c.byte_part(RegisterId(0), 0), Some(RegisterId(0)));
        assert_eq!(c.container(RegisterId(2)), Some(RegisterId(3)));
    }

    #[test]
    #[should_panic(expected = "out of catalog order")]
    fn test_catalog_order_enforced() {
        RegisterCatalog::new(vec![Register::byte(1, "x")]);
    }
}
