//! Relocation records and their per-machine encodings

use crate::section::SectionKind;
use serde::{Deserialize, Serialize};

/// How a relocated field is computed from the target address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// `S + A`, 4 bytes
    Absolute32,
    /// `S + A - P`, 4 bytes
    Relative32,
    /// `S + A`, 2 bytes
    Absolute16,
    /// `S + A`, 1 byte
    Absolute8,
}

impl LinkType {
    /// Width of the patched field in bytes
    pub fn width(self) -> usize {
        match self {
            LinkType::Absolute32 | LinkType::Relative32 => 4,
            LinkType::Absolute16 => 2,
            LinkType::Absolute8 => 1,
        }
    }
}

/// A relocation recorded in the program image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    /// Section containing the patched field
    pub section: SectionKind,
    /// Offset of the patched field within the section
    pub offset: u32,
    /// Field computation
    pub link_type: LinkType,
    /// Target symbol name, resolved to an index at write time
    pub symbol: String,
    /// Constant addend
    pub addend: i32,
}

/// A relocation relative to the start of a fragment, before merging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRelocation {
    /// Offset of the patched field within the fragment
    pub offset: u32,
    /// Field computation
    pub link_type: LinkType,
    /// Target symbol name
    pub symbol: String,
    /// Constant addend
    pub addend: i32,
}

/// Target machine description used when encoding an object file
pub trait TargetMachine: Send + Sync {
    /// Human-readable machine name
    fn name(&self) -> &str;

    /// ELF `e_machine` value
    fn elf_machine(&self) -> u16;

    /// Machine relocation type for `link_type`
    fn relocation_type(&self, link_type: LinkType) -> u8;
}

/// 32-bit x86
#[derive(Debug, Clone, Copy, Default)]
pub struct I386;

impl TargetMachine for I386 {
    fn name(&self) -> &str {
        "i386"
    }

    fn elf_machine(&self) -> u16 {
        3
    }

    fn relocation_type(&self, link_type: LinkType) -> u8 {
        match link_type {
            LinkType::Absolute32 => 1,
            LinkType::Relative32 => 2,
            LinkType::Absolute16 => 20,
            LinkType::Absolute8 => 22,
        }
    }
}
