//! The program image shared by all method compilations
//!
//! [`ImageContents`] is the plain data: four sections, a symbol list, the
//! relocation list and the set of names expected from other objects.
//! [`ProgramImage`] puts it behind one `parking_lot::Mutex` so workers can
//! merge their output concurrently; every merge claims a non-overlapping range
//! while holding the lock.

use crate::elf32;
use crate::error::ObjectError;
use crate::relocation::{FragmentRelocation, I386, Relocation, TargetMachine};
use crate::section::{PatchKind, Section, SectionKind};
use crate::symbol::{Symbol, SymbolBinding, SymbolKind};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::path::Path;

/// A self-contained piece of output (a compiled method, a data blob)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Symbol defined at the start of the fragment
    pub symbol: String,
    /// Destination section
    pub section: SectionKind,
    /// Function or object
    pub kind: SymbolKind,
    /// Symbol binding
    pub binding: SymbolBinding,
    /// Required alignment of the fragment start
    pub alignment: usize,
    /// Fragment bytes
    pub bytes: Vec<u8>,
    /// Relocations relative to the fragment start
    pub relocations: Vec<FragmentRelocation>,
}

/// Sections, symbols and relocations of one program image
#[derive(Debug, Clone)]
pub struct ImageContents {
    sections: [Section; 4],
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, usize>,
    relocations: Vec<Relocation>,
    externals: BTreeSet<String>,
}

impl Default for ImageContents {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageContents {
    /// Create empty contents
    pub fn new() -> Self {
        ImageContents {
            sections: SectionKind::ALL.map(Section::new),
            symbols: Vec::new(),
            by_name: FxHashMap::default(),
            relocations: Vec::new(),
            externals: BTreeSet::new(),
        }
    }

    /// Section of the given kind
    pub fn section(&self, kind: SectionKind) -> &Section {
        &self.sections[kind.index()]
    }

    /// Mutable section of the given kind
    pub fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
        &mut self.sections[kind.index()]
    }

    /// Defined symbols in definition order
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Look up a defined symbol
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// All relocations in insertion order
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Names declared as provided by other objects
    pub fn externals(&self) -> &BTreeSet<String> {
        &self.externals
    }

    /// Whether `name` is defined here or declared external
    pub fn is_resolvable(&self, name: &str) -> bool {
        self.by_name.contains_key(name) || self.externals.contains(name)
    }

    /// Define a symbol
    pub fn define_symbol(&mut self, symbol: Symbol) -> Result<(), ObjectError> {
        if self.by_name.contains_key(&symbol.name) {
            return Err(ObjectError::DuplicateSymbol(symbol.name));
        }
        self.by_name.insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
        Ok(())
    }

    /// Declare a name provided by another object
    pub fn declare_external(&mut self, name: impl Into<String>) {
        self.externals.insert(name.into());
    }

    /// Record a relocation
    pub fn add_relocation(&mut self, relocation: Relocation) {
        self.relocations.push(relocation);
    }

    /// Place a fragment, define its symbol and rebase its relocations
    ///
    /// Returns the section offset of the fragment.
    pub fn merge(&mut self, fragment: Fragment) -> Result<u32, ObjectError> {
        if self.by_name.contains_key(&fragment.symbol) {
            return Err(ObjectError::DuplicateSymbol(fragment.symbol));
        }
        let section = self.section_mut(fragment.section);
        let base = section.append(&fragment.bytes, fragment.alignment) as u32;

        self.define_symbol(Symbol {
            name: fragment.symbol,
            section: fragment.section,
            offset: base,
            size: fragment.bytes.len() as u32,
            kind: fragment.kind,
            binding: fragment.binding,
        })?;
        for reloc in fragment.relocations {
            self.relocations.push(Relocation {
                section: fragment.section,
                offset: base + reloc.offset,
                link_type: reloc.link_type,
                symbol: reloc.symbol,
                addend: reloc.addend,
            });
        }
        Ok(base)
    }

    /// Names referenced by relocations that nothing provides
    pub fn unresolved(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .relocations
            .iter()
            .map(|r| r.symbol.as_str())
            .filter(|name| !self.is_resolvable(name))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Thread-safe program image
#[derive(Debug, Default)]
pub struct ProgramImage {
    contents: Mutex<ImageContents>,
}

impl ProgramImage {
    /// Create an empty image
    pub fn new() -> Self {
        ProgramImage {
            contents: Mutex::new(ImageContents::new()),
        }
    }

    /// Lock the image for a multi-step update
    pub fn lock(&self) -> MutexGuard<'_, ImageContents> {
        self.contents.lock()
    }

    /// Merge a fragment under the lock
    pub fn merge(&self, fragment: Fragment) -> Result<u32, ObjectError> {
        let symbol = fragment.symbol.clone();
        let offset = self.contents.lock().merge(fragment)?;
        log::trace!("merged {} at offset {:#x}", symbol, offset);
        Ok(offset)
    }

    /// Append raw bytes to a section and return their offset
    pub fn append(&self, kind: SectionKind, bytes: &[u8], alignment: usize) -> u32 {
        self.contents.lock().section_mut(kind).append(bytes, alignment) as u32
    }

    /// Reserve zero-filled space (the only way to grow BSS)
    pub fn reserve(&self, kind: SectionKind, size: usize, alignment: usize) -> u32 {
        self.contents.lock().section_mut(kind).allocate(size, alignment).offset as u32
    }

    /// Overwrite emitted bytes
    pub fn apply_patch(
        &self,
        kind: SectionKind,
        offset: usize,
        patch: PatchKind,
        value: u64,
    ) -> Result<(), ObjectError> {
        self.contents.lock().section_mut(kind).apply_patch(offset, patch, value)
    }

    /// Define a symbol
    pub fn define_symbol(&self, symbol: Symbol) -> Result<(), ObjectError> {
        self.contents.lock().define_symbol(symbol)
    }

    /// Declare a name provided by another object
    pub fn declare_external(&self, name: impl Into<String>) {
        self.contents.lock().declare_external(name);
    }

    /// Record a relocation
    pub fn add_relocation(&self, relocation: Relocation) {
        self.contents.lock().add_relocation(relocation);
    }

    /// Copy of a defined symbol
    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.contents.lock().symbol(name).cloned()
    }

    /// Current length of a section
    pub fn section_len(&self, kind: SectionKind) -> usize {
        self.contents.lock().section(kind).len()
    }

    /// Encode the image as an ELF32 relocatable object for i386
    pub fn write_elf32(&self) -> Result<Vec<u8>, ObjectError> {
        self.write_object(&I386)
    }

    /// Encode the image as an ELF32 relocatable object for `target`
    pub fn write_object(&self, target: &dyn TargetMachine) -> Result<Vec<u8>, ObjectError> {
        let contents = self.contents.lock();
        elf32::write_elf32(&contents, target)
    }

    /// Encode and write the object to `path`
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ObjectError> {
        let bytes = self.write_elf32()?;
        std::fs::write(path.as_ref(), &bytes)?;
        log::info!("wrote {} bytes to {}", bytes.len(), path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::LinkType;
    use std::sync::Arc;

    fn method(name: &str, size: usize, calls: &[&str]) -> Fragment {
        Fragment {
            symbol: name.to_string(),
            section: SectionKind::Text,
            kind: SymbolKind::Function,
            binding: SymbolBinding::Global,
            alignment: 16,
            bytes: vec![0x90; size],
            relocations: calls
                .iter()
                .enumerate()
                .map(|(i, target)| FragmentRelocation {
                    offset: (i * 5 + 1) as u32,
                    link_type: LinkType::Relative32,
                    symbol: target.to_string(),
                    addend: -4,
                })
                .collect(),
        }
    }

    #[test]
    fn test_merge_rebases_relocations() {
        let mut image = ImageContents::new();
        assert_eq!(image.merge(method("a", 10, &[])).unwrap(), 0);
        assert_eq!(image.merge(method("b", 12, &["a", "c"])).unwrap(), 16);
        assert_eq!(image.section(SectionKind::Text).len(), 28);

        let relocs = image.relocations();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0].offset, 17);
        assert_eq!(relocs[1].offset, 22);
        assert_eq!(image.symbol("b").unwrap().size, 12);
        assert_eq!(image.unresolved(), vec!["c"]);

        image.declare_external("c");
        assert!(image.unresolved().is_empty());
    }

    #[test]
    fn test_duplicate_symbol_leaves_sections_untouched() {
        let mut image = ImageContents::new();
        image.merge(method("a", 4, &[])).unwrap();
        let err = image.merge(method("a", 4, &[])).unwrap_err();
        assert!(matches!(err, ObjectError::DuplicateSymbol(ref n) if n == "a"));
        assert_eq!(image.section(SectionKind::Text).len(), 4);
    }

    #[test]
    fn test_concurrent_merges_claim_disjoint_ranges() {
        let image = Arc::new(ProgramImage::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let image = Arc::clone(&image);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|i| image.merge(method(&format!("m{}_{}", t, i), 7, &[])).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut offsets: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        offsets.sort_unstable();
        for pair in offsets.windows(2) {
            assert!(pair[1] >= pair[0] + 7);
            assert_eq!(pair[1] % 16, 0);
        }
        assert_eq!(image.section_len(SectionKind::Text), 127 * 16 + 7);
    }

    #[test]
    fn test_reserve_bss() {
        let image = ProgramImage::new();
        assert_eq!(image.reserve(SectionKind::Bss, 6, 4), 0);
        assert_eq!(image.reserve(SectionKind::Bss, 4, 4), 8);
        assert_eq!(image.section_len(SectionKind::Bss), 12);
    }
}
