//! Symbols naming offsets within sections

use crate::section::SectionKind;
use serde::{Deserialize, Serialize};

/// What a symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// Code entry point
    Function,
    /// Data object
    Object,
}

/// Symbol visibility to the linker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolBinding {
    /// Visible only inside this object
    Local,
    /// Visible to other objects
    Global,
}

/// A defined symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Section holding the definition
    pub section: SectionKind,
    /// Offset within the section
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Function or object
    pub kind: SymbolKind,
    /// Local or global
    pub binding: SymbolBinding,
}

impl Symbol {
    /// A global function symbol
    pub fn function(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Symbol {
            name: name.into(),
            section: SectionKind::Text,
            offset,
            size,
            kind: SymbolKind::Function,
            binding: SymbolBinding::Global,
        }
    }

    /// A global data symbol in `section`
    pub fn object(name: impl Into<String>, section: SectionKind, offset: u32, size: u32) -> Self {
        Symbol {
            name: name.into(),
            section,
            offset,
            size,
            kind: SymbolKind::Object,
            binding: SymbolBinding::Global,
        }
    }

    /// Same symbol with local binding
    pub fn local(mut self) -> Self {
        self.binding = SymbolBinding::Local;
        self
    }
}
