//! Value types carried by IR operands
//!
//! Every operand has a [`ValueType`]: a kind (integer or float), a width in
//! bytes and a signedness. Integers narrower than four bytes are promoted to
//! four bytes for arithmetic; eight-byte integers and both float widths keep
//! their exact type.

use kiln_bytecode::ElementType;
use std::fmt;

/// Integer or floating point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Two's complement integer (pointers included)
    Int,
    /// IEEE 754 float
    Float,
}

/// Type of a value flowing through the IR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
    /// Integer or float
    pub kind: TypeKind,
    /// Width in bytes: 1, 2, 4 or 8
    pub width: u8,
    /// Signedness (always true for floats)
    pub signed: bool,
}

impl ValueType {
    pub const I1: ValueType = ValueType::int(1, true);
    pub const U1: ValueType = ValueType::int(1, false);
    pub const I2: ValueType = ValueType::int(2, true);
    pub const U2: ValueType = ValueType::int(2, false);
    pub const I4: ValueType = ValueType::int(4, true);
    pub const U4: ValueType = ValueType::int(4, false);
    pub const I8: ValueType = ValueType::int(8, true);
    pub const U8: ValueType = ValueType::int(8, false);
    pub const R4: ValueType = ValueType::float(4);
    pub const R8: ValueType = ValueType::float(8);
    /// Native pointer on the 32-bit target
    pub const PTR: ValueType = ValueType::U4;

    /// Integer type of the given width
    pub const fn int(width: u8, signed: bool) -> Self {
        ValueType {
            kind: TypeKind::Int,
            width,
            signed,
        }
    }

    /// Float type of the given width
    pub const fn float(width: u8) -> Self {
        ValueType {
            kind: TypeKind::Float,
            width,
            signed: true,
        }
    }

    /// Map a metadata element type; `Void` has no value type
    pub fn from_element(element: ElementType) -> Option<Self> {
        Some(match element {
            ElementType::Void => return None,
            ElementType::Boolean | ElementType::U1 => Self::U1,
            ElementType::I1 => Self::I1,
            ElementType::Char | ElementType::U2 => Self::U2,
            ElementType::I2 => Self::I2,
            ElementType::I4 | ElementType::I => Self::I4,
            ElementType::U4 | ElementType::U | ElementType::Ptr => Self::U4,
            ElementType::I8 => Self::I8,
            ElementType::U8 => Self::U8,
            ElementType::R4 => Self::R4,
            ElementType::R8 => Self::R8,
        })
    }

    #[inline]
    pub fn is_int(self) -> bool {
        self.kind == TypeKind::Int
    }

    #[inline]
    pub fn is_float(self) -> bool {
        self.kind == TypeKind::Float
    }

    /// Eight-byte integer, handled as a register pair
    #[inline]
    pub fn is_long(self) -> bool {
        self.is_int() && self.width == 8
    }

    /// Integer narrower than four bytes
    #[inline]
    pub fn is_narrow(self) -> bool {
        self.is_int() && self.width < 4
    }

    /// Bytes occupied by a stack slot of this type
    pub fn slot_size(self) -> u32 {
        if self.width == 8 {
            8
        } else {
            4
        }
    }

    /// Type used for arithmetic on a value of this type
    pub fn promoted(self) -> Self {
        if self.is_narrow() {
            ValueType::int(4, self.signed)
        } else {
            self
        }
    }

    /// Result type of a binary operation: the wider promoted operand, the left on ties
    pub fn binary_result(left: ValueType, right: ValueType) -> ValueType {
        let (left, right) = (left.promoted(), right.promoted());
        if right.width > left.width {
            right
        } else {
            left
        }
    }

    /// Same width and kind with the given signedness
    pub fn with_signed(self, signed: bool) -> Self {
        if self.is_float() {
            self
        } else {
            ValueType { signed, ..self }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.signed) {
            (TypeKind::Float, _) => write!(f, "r{}", self.width),
            (TypeKind::Int, true) => write!(f, "i{}", self.width),
            (TypeKind::Int, false) => write!(f, "u{}", self.width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion() {
        assert_eq!(ValueType::I1.promoted(), ValueType::I4);
        assert_eq!(ValueType::U2.promoted(), ValueType::U4);
        assert_eq!(ValueType::I8.promoted(), ValueType::I8);
        assert_eq!(ValueType::R4.promoted(), ValueType::R4);
    }

    #[test]
    fn test_binary_result_prefers_wider_then_left() {
        assert_eq!(ValueType::binary_result(ValueType::U1, ValueType::I2), ValueType::U4);
        assert_eq!(ValueType::binary_result(ValueType::I4, ValueType::U8), ValueType::U8);
        assert_eq!(ValueType::binary_result(ValueType::R8, ValueType::R4), ValueType::R8);
        assert_eq!(ValueType::binary_result(ValueType::R4, ValueType::R8), ValueType::R8);
        assert_eq!(ValueType::binary_result(ValueType::U4, ValueType::I4), ValueType::U4);
    }

    #[test]
    fn test_element_mapping() {
        assert_eq!(ValueType::from_element(ElementType::Boolean), Some(ValueType::U1));
        assert_eq!(ValueType::from_element(ElementType::Ptr), Some(ValueType::PTR));
        assert_eq!(ValueType::from_element(ElementType::Void), None);
        assert_eq!(ValueType::I8.slot_size(), 8);
        assert_eq!(ValueType::U2.slot_size(), 4);
        assert_eq!(ValueType::U2.to_string(), "u2");
        assert_eq!(ValueType::R8.to_string(), "r8");
    }
}
