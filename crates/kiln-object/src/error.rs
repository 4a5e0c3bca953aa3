//! Object writer errors

use crate::section::SectionKind;
use thiserror::Error;

/// Errors raised while building or writing a program image
#[derive(Debug, Error)]
pub enum ObjectError {
    /// A relocation targets a symbol that is neither defined nor external
    #[error("Unresolved symbol '{symbol}' referenced from {section} offset {offset}")]
    UnresolvedSymbol {
        /// Target symbol name
        symbol: String,
        /// Section holding the relocation
        section: SectionKind,
        /// Offset of the patched field
        offset: u32,
    },

    /// A symbol name was defined twice
    #[error("Duplicate symbol '{0}'")]
    DuplicateSymbol(String),

    /// Section name does not match any known section
    #[error("Unknown section '{0}'")]
    UnknownSection(String),

    /// A patch would write outside the emitted bytes
    #[error("Patch of {width} bytes at offset {offset} exceeds {section} length {length}")]
    PatchOutOfRange {
        /// Section being patched
        section: SectionKind,
        /// Patch offset
        offset: usize,
        /// Patch width in bytes
        width: usize,
        /// Current section length
        length: usize,
    },

    /// Failed to write the object file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
