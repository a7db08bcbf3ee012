//! Language-agnostic type system for IR
//!
//! 8-bit targets only know bytes and words; pointers are always two bytes
//! wide and nothing is aligned beyond a byte.

use std::fmt;

/// Language-agnostic type for IR
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IrType {
    pub kind: IrTypeKind,
    /// Size in bytes
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrTypeKind {
    /// Void type (no value)
    Void,

    /// Integer type
    Int {
        bits: u8,        // 8 or 16
        signed: bool,
    },

    /// Pointer type
    Pointer(Box<IrType>),

    /// Array type
    Array {
        element: Box<IrType>,
        count: usize,
    },
}

impl IrType {
    /// Void type (size 0)
    pub fn void() -> Self {
        Self { kind: IrTypeKind::Void, size: 0 }
    }

    /// Unsigned 8-bit integer
    pub fn byte() -> Self {
        Self { kind: IrTypeKind::Int { bits: 8, signed: false }, size: 1 }
    }

    /// Signed 8-bit integer
    pub fn sbyte() -> Self {
        Self { kind: IrTypeKind::Int { bits: 8, signed: true }, size: 1 }
    }

    /// Unsigned 16-bit integer
    pub fn word() -> Self {
        Self { kind: IrTypeKind::Int { bits: 16, signed: false }, size: 2 }
    }

    /// Signed 16-bit integer
    pub fn sword() -> Self {
        Self { kind: IrTypeKind::Int { bits: 16, signed: true }, size: 2 }
    }

    /// Pointer type (16-bit on every supported CPU)
    pub fn ptr(inner: IrType) -> Self {
        Self {
            kind: IrTypeKind::Pointer(Box::new(inner)),
            size: 2,
        }
    }

    /// Array type
    pub fn array(element: IrType, count: usize) -> Self {
        let size = element.size * count;
        Self {
            kind: IrTypeKind::Array {
                element: Box::new(element),
                count,
            },
            size,
        }
    }

    /// Integer type of the given width in bytes
    pub fn integer(size: usize) -> Self {
        if size == 1 { Self::byte() } else { Self::word() }
    }

    // ==================== Type queries ====================

    pub fn is_void(&self) -> bool {
        matches!(self.kind, IrTypeKind::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, IrTypeKind::Int { .. })
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.kind, IrTypeKind::Int { signed: true, .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, IrTypeKind::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, IrTypeKind::Array { .. })
    }

    /// Whether a value of this type fits a register and may take part in
    /// register allocation
    pub fn is_parameterizable(&self) -> bool {
        (self.is_integer() || self.is_pointer()) && (self.size == 1 || self.size == 2)
    }

    pub fn is_byte(&self) -> bool {
        self.is_parameterizable() && self.size == 1
    }

    pub fn is_word(&self) -> bool {
        self.is_parameterizable() && self.size == 2
    }

    /// Get the element type if this is a pointer or array
    pub fn element_type(&self) -> Option<&IrType> {
        match &self.kind {
            IrTypeKind::Pointer(inner) => Some(inner),
            IrTypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }
}

impl Default for IrType {
    fn default() -> Self {
        Self::byte()
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IrTypeKind::Void => write!(f, "void"),
            IrTypeKind::Int { bits: 8, signed: false } => write!(f, "byte"),
            IrTypeKind::Int { bits: 8, signed: true } => write!(f, "sbyte"),
            IrTypeKind::Int { signed: false, .. } => write!(f, "word"),
            IrTypeKind::Int { signed: true, .. } => write!(f, "sword"),
            IrTypeKind::Pointer(inner) => write!(f, "ptr {}", inner),
            IrTypeKind::Array { element, count } => write!(f, "{}[{}]", element, count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(IrType::byte().size, 1);
        assert_eq!(IrType::sword().size, 2);
        assert_eq!(IrType::ptr(IrType::byte()).size, 2);
        assert_eq!(IrType::array(IrType::word(), 8).size, 16);
    }

    #[test]
    fn test_parameterizable() {
        assert!(IrType::byte().is_parameterizable());
        assert!(IrType::ptr(IrType::word()).is_parameterizable());
        assert!(!IrType::array(IrType::byte(), 2).is_parameterizable());
        assert!(!IrType::void().is_parameterizable());
    }

    #[test]
    fn test_display() {
        assert_eq!(IrType::ptr(IrType::array(IrType::byte(), 4)).to_string(), "ptr byte[4]");
    }
}
