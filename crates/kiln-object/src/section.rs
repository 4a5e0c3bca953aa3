//! Output sections
//!
//! A [`Section`] owns its bytes and a write cursor that only moves forward.
//! [`Section::allocate`] claims the next aligned range; [`Section::apply_patch`]
//! rewrites bytes already claimed without moving the cursor. BSS sections
//! track their length but store no bytes.

use crate::error::ObjectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of output section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SectionKind {
    /// Executable code
    Text = 0,
    /// Initialized writable data
    Data = 1,
    /// Read-only data
    ROData = 2,
    /// Zero-initialized data
    Bss = 3,
}

impl SectionKind {
    /// All kinds in section-table order
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Text,
        SectionKind::Data,
        SectionKind::ROData,
        SectionKind::Bss,
    ];

    /// Conventional section name
    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Text => ".text",
            SectionKind::Data => ".data",
            SectionKind::ROData => ".rodata",
            SectionKind::Bss => ".bss",
        }
    }

    /// Whether the section occupies file space
    pub fn has_contents(self) -> bool {
        self != SectionKind::Bss
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SectionKind {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SectionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ObjectError::UnknownSection(s.to_string()))
    }
}

/// Width of an in-place patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchKind {
    /// 1 byte
    I1,
    /// 2 bytes
    I2,
    /// 4 bytes
    I4,
    /// 8 bytes
    I8,
}

impl PatchKind {
    /// Width in bytes
    pub fn width(self) -> usize {
        match self {
            PatchKind::I1 => 1,
            PatchKind::I2 => 2,
            PatchKind::I4 => 4,
            PatchKind::I8 => 8,
        }
    }
}

/// A freshly allocated range inside a section
#[derive(Debug)]
pub struct Allocation<'a> {
    /// Offset of the range within the section
    pub offset: usize,
    /// Writable bytes of the range (empty for BSS)
    pub bytes: &'a mut [u8],
}

/// One output section
#[derive(Debug, Clone)]
pub struct Section {
    kind: SectionKind,
    data: Vec<u8>,
    length: usize,
    virtual_address: u32,
    alignment: usize,
}

impl Section {
    /// Create an empty section
    pub fn new(kind: SectionKind) -> Self {
        Section {
            kind,
            data: Vec::new(),
            length: 0,
            virtual_address: 0,
            alignment: 1,
        }
    }

    /// Section kind
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// Current length, including BSS reservations
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether nothing has been allocated yet
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Emitted bytes (empty for BSS)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Largest alignment requested so far
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Load address recorded in the section header
    pub fn virtual_address(&self) -> u32 {
        self.virtual_address
    }

    /// Set the load address recorded in the section header
    pub fn set_virtual_address(&mut self, address: u32) {
        self.virtual_address = address;
    }

    /// Claim `size` bytes aligned to `alignment`, zero-padding the gap
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Allocation<'_> {
        let alignment = alignment.max(1);
        let padding = (alignment - self.length % alignment) % alignment;
        let offset = self.length + padding;
        self.length = offset + size;
        self.alignment = self.alignment.max(alignment);

        if self.kind.has_contents() {
            self.data.resize(self.length, 0);
            Allocation {
                offset,
                bytes: &mut self.data[offset..],
            }
        } else {
            Allocation {
                offset,
                bytes: &mut [],
            }
        }
    }

    /// Append `bytes` at the next `alignment` boundary and return their offset
    pub fn append(&mut self, bytes: &[u8], alignment: usize) -> usize {
        let allocation = self.allocate(bytes.len(), alignment);
        if !allocation.bytes.is_empty() {
            allocation.bytes.copy_from_slice(bytes);
        }
        allocation.offset
    }

    /// Overwrite previously emitted bytes in place (little-endian)
    pub fn apply_patch(&mut self, offset: usize, kind: PatchKind, value: u64) -> Result<(), ObjectError> {
        let width = kind.width();
        if !self.kind.has_contents() || offset + width > self.data.len() {
            return Err(ObjectError::PatchOutOfRange {
                section: self.kind,
                offset,
                width,
                length: self.data.len(),
            });
        }
        let bytes = value.to_le_bytes();
        self.data[offset..offset + width].copy_from_slice(&bytes[..width]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_pads_to_alignment() {
        let mut text = Section::new(SectionKind::Text);
        assert_eq!(text.append(&[0xC3], 1), 0);
        let second = text.allocate(4, 16);
        assert_eq!(second.offset, 16);
        second.bytes.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(text.len(), 20);
        assert_eq!(&text.data()[1..16], &[0u8; 15]);
        assert_eq!(text.alignment(), 16);
    }

    #[test]
    fn test_aligned_allocation_adds_no_padding() {
        let mut data = Section::new(SectionKind::Data);
        data.allocate(16, 16);
        let next = data.allocate(8, 16);
        assert_eq!(next.offset, 16);
        assert_eq!(data.len(), 24);
    }

    #[test]
    fn test_bss_tracks_length_only() {
        let mut bss = Section::new(SectionKind::Bss);
        let a = bss.allocate(10, 4);
        assert_eq!(a.offset, 0);
        assert!(a.bytes.is_empty());
        let b = bss.allocate(4, 8);
        assert_eq!(b.offset, 16);
        assert_eq!(bss.len(), 20);
        assert!(bss.data().is_empty());
        assert!(bss.apply_patch(0, PatchKind::I1, 1).is_err());
    }

    #[test]
    fn test_apply_patch_keeps_cursor() {
        let mut text = Section::new(SectionKind::Text);
        text.append(&[0x90; 8], 1);
        text.apply_patch(1, PatchKind::I4, 0xDEAD_BEEF).unwrap();
        text.apply_patch(0, PatchKind::I1, 0xE8).unwrap();
        assert_eq!(text.len(), 8);
        assert_eq!(text.data(), &[0xE8, 0xEF, 0xBE, 0xAD, 0xDE, 0x90, 0x90, 0x90]);
        assert_eq!(text.append(&[0xC3], 1), 8);
    }

    #[test]
    fn test_patch_out_of_range() {
        let mut text = Section::new(SectionKind::Text);
        text.append(&[0; 4], 1);
        let err = text.apply_patch(2, PatchKind::I4, 0).unwrap_err();
        assert!(matches!(err, ObjectError::PatchOutOfRange { offset: 2, width: 4, .. }));
    }

    #[test]
    fn test_section_names() {
        assert_eq!(".rodata".parse::<SectionKind>().unwrap(), SectionKind::ROData);
        assert!(".init".parse::<SectionKind>().is_err());
        assert_eq!(SectionKind::Bss.to_string(), ".bss");
    }
}
