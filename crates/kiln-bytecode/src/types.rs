//! Element types of parameters, locals and return values

use serde::{Deserialize, Serialize};

/// Primitive element type as resolved by the metadata loader
///
/// Native-sized types (`I`, `U`, `Ptr`) are 4 bytes wide on the 32-bit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// No value
    Void,
    /// 1-byte boolean
    Boolean,
    /// 2-byte UTF-16 code unit
    Char,
    /// Signed 8-bit integer
    I1,
    /// Unsigned 8-bit integer
    U1,
    /// Signed 16-bit integer
    I2,
    /// Unsigned 16-bit integer
    U2,
    /// Signed 32-bit integer
    I4,
    /// Unsigned 32-bit integer
    U4,
    /// Signed 64-bit integer
    I8,
    /// Unsigned 64-bit integer
    U8,
    /// IEEE single
    R4,
    /// IEEE double
    R8,
    /// Native signed integer
    I,
    /// Native unsigned integer
    U,
    /// Unmanaged pointer
    Ptr,
}

impl ElementType {
    /// Storage size in bytes
    pub fn size(self) -> u32 {
        match self {
            ElementType::Void => 0,
            ElementType::Boolean | ElementType::I1 | ElementType::U1 => 1,
            ElementType::Char | ElementType::I2 | ElementType::U2 => 2,
            ElementType::I4
            | ElementType::U4
            | ElementType::R4
            | ElementType::I
            | ElementType::U
            | ElementType::Ptr => 4,
            ElementType::I8 | ElementType::U8 | ElementType::R8 => 8,
        }
    }

    /// Whether the type is an IEEE float
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::R4 | ElementType::R8)
    }

    /// Whether the type is an integer, boolean, char or pointer
    pub fn is_integer(self) -> bool {
        !self.is_float() && self != ElementType::Void
    }

    /// Whether integer values of this type are interpreted as signed
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ElementType::I1
                | ElementType::I2
                | ElementType::I4
                | ElementType::I8
                | ElementType::I
                | ElementType::R4
                | ElementType::R8
        )
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementType::Void => "void",
            ElementType::Boolean => "bool",
            ElementType::Char => "char",
            ElementType::I1 => "i1",
            ElementType::U1 => "u1",
            ElementType::I2 => "i2",
            ElementType::U2 => "u2",
            ElementType::I4 => "i4",
            ElementType::U4 => "u4",
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::R4 => "r4",
            ElementType::R8 => "r8",
            ElementType::I => "i",
            ElementType::U => "u",
            ElementType::Ptr => "ptr",
        };
        f.write_str(name)
    }
}
