//! ELF32 relocatable object encoding
//!
//! Layout: ELF header, section contents, one `.rela<name>` per section that
//! carries relocations, `.symtab`, `.strtab`, `.shstrtab`, then the section
//! header table. Symbol indices are assigned here and nowhere else: null,
//! section symbols, local symbols, then globals (defined first, then
//! undefined externals in name order).

use crate::error::ObjectError;
use crate::image::ImageContents;
use crate::relocation::TargetMachine;
use crate::section::SectionKind;
use crate::symbol::{SymbolBinding, SymbolKind};
use rustc_hash::FxHashMap;

/// ELF header size
pub const EHDR_SIZE: usize = 52;
/// Section header entry size
pub const SHDR_SIZE: usize = 40;
/// Symbol table entry size
pub const SYM_SIZE: usize = 16;
/// RELA entry size
pub const RELA_SIZE: usize = 12;

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;

const SHF_WRITE: u32 = 0x1;
const SHF_ALLOC: u32 = 0x2;
const SHF_EXECINSTR: u32 = 0x4;
const SHF_INFO_LINK: u32 = 0x40;

const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;
const STT_NOTYPE: u8 = 0;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;
const STT_SECTION: u8 = 3;

struct StringTable {
    bytes: Vec<u8>,
    offsets: FxHashMap<String, u32>,
}

impl StringTable {
    fn new() -> Self {
        StringTable {
            bytes: vec![0],
            offsets: FxHashMap::default(),
        }
    }

    fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }
}

#[derive(Default, Clone, Copy)]
struct SectionHeader {
    name: u32,
    kind: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    align: u32,
    entsize: u32,
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn pad_to(out: &mut Vec<u8>, alignment: usize) {
    let alignment = alignment.max(1);
    let padding = (alignment - out.len() % alignment) % alignment;
    out.resize(out.len() + padding, 0);
}

fn put_symbol(out: &mut Vec<u8>, name: u32, value: u32, size: u32, info: u8, shndx: u16) {
    put_u32(out, name);
    put_u32(out, value);
    put_u32(out, size);
    out.push(info);
    out.push(0);
    put_u16(out, shndx);
}

/// Header index of a content section (index 0 is the null section)
fn content_index(kind: SectionKind) -> u16 {
    kind as u16 + 1
}

fn content_flags(kind: SectionKind) -> u32 {
    match kind {
        SectionKind::Text => SHF_ALLOC | SHF_EXECINSTR,
        SectionKind::Data | SectionKind::Bss => SHF_ALLOC | SHF_WRITE,
        SectionKind::ROData => SHF_ALLOC,
    }
}

/// Encode `contents` as an ELF32 relocatable object
pub fn write_elf32(contents: &ImageContents, target: &dyn TargetMachine) -> Result<Vec<u8>, ObjectError> {
    // ===== Symbol table =====
    let mut strtab = StringTable::new();
    let mut symtab = Vec::new();
    let mut indices: FxHashMap<&str, u32> = FxHashMap::default();
    let mut count = 0u32;

    put_symbol(&mut symtab, 0, 0, 0, 0, 0);
    count += 1;
    for kind in SectionKind::ALL {
        put_symbol(&mut symtab, 0, 0, 0, (STB_LOCAL << 4) | STT_SECTION, content_index(kind));
        count += 1;
    }

    let ordered = contents
        .symbols()
        .iter()
        .filter(|s| s.binding == SymbolBinding::Local)
        .chain(contents.symbols().iter().filter(|s| s.binding == SymbolBinding::Global));
    let mut first_global = None;
    for symbol in ordered {
        let bind = match symbol.binding {
            SymbolBinding::Local => STB_LOCAL,
            SymbolBinding::Global => {
                if first_global.is_none() {
                    first_global = Some(count);
                }
                STB_GLOBAL
            }
        };
        let kind = match symbol.kind {
            SymbolKind::Function => STT_FUNC,
            SymbolKind::Object => STT_OBJECT,
        };
        let name = strtab.add(&symbol.name);
        put_symbol(
            &mut symtab,
            name,
            symbol.offset,
            symbol.size,
            (bind << 4) | kind,
            content_index(symbol.section),
        );
        indices.insert(symbol.name.as_str(), count);
        count += 1;
    }
    for external in contents.externals() {
        if indices.contains_key(external.as_str()) {
            continue;
        }
        if first_global.is_none() {
            first_global = Some(count);
        }
        let name = strtab.add(external);
        put_symbol(&mut symtab, name, 0, 0, (STB_GLOBAL << 4) | STT_NOTYPE, 0);
        indices.insert(external.as_str(), count);
        count += 1;
    }
    let first_global = first_global.unwrap_or(count);

    // ===== Relocation tables =====
    let mut rela_tables: Vec<(SectionKind, Vec<u8>)> = Vec::new();
    for kind in SectionKind::ALL {
        let mut table = Vec::new();
        for reloc in contents.relocations().iter().filter(|r| r.section == kind) {
            let index = indices.get(reloc.symbol.as_str()).copied().ok_or_else(|| {
                ObjectError::UnresolvedSymbol {
                    symbol: reloc.symbol.clone(),
                    section: reloc.section,
                    offset: reloc.offset,
                }
            })?;
            put_u32(&mut table, reloc.offset);
            put_u32(&mut table, (index << 8) | u32::from(target.relocation_type(reloc.link_type)));
            table.extend_from_slice(&reloc.addend.to_le_bytes());
        }
        if !table.is_empty() {
            rela_tables.push((kind, table));
        }
    }

    // ===== Section layout =====
    let mut shstrtab = StringTable::new();
    let mut headers = vec![SectionHeader::default()];
    let mut out = vec![0u8; EHDR_SIZE];

    for kind in SectionKind::ALL {
        let section = contents.section(kind);
        pad_to(&mut out, section.alignment());
        let offset = out.len() as u32;
        out.extend_from_slice(section.data());
        headers.push(SectionHeader {
            name: shstrtab.add(kind.name()),
            kind: if kind.has_contents() { SHT_PROGBITS } else { SHT_NOBITS },
            flags: content_flags(kind),
            addr: section.virtual_address(),
            offset,
            size: section.len() as u32,
            align: section.alignment() as u32,
            ..SectionHeader::default()
        });
    }

    let symtab_index = (headers.len() + rela_tables.len()) as u32;
    for (kind, table) in &rela_tables {
        pad_to(&mut out, 4);
        let offset = out.len() as u32;
        out.extend_from_slice(table);
        headers.push(SectionHeader {
            name: shstrtab.add(&format!(".rela{}", kind.name())),
            kind: SHT_RELA,
            flags: SHF_INFO_LINK,
            offset,
            size: table.len() as u32,
            link: symtab_index,
            info: u32::from(content_index(*kind)),
            align: 4,
            entsize: RELA_SIZE as u32,
            ..SectionHeader::default()
        });
    }

    pad_to(&mut out, 4);
    let symtab_offset = out.len() as u32;
    out.extend_from_slice(&symtab);
    headers.push(SectionHeader {
        name: shstrtab.add(".symtab"),
        kind: SHT_SYMTAB,
        offset: symtab_offset,
        size: symtab.len() as u32,
        link: symtab_index + 1,
        info: first_global,
        align: 4,
        entsize: SYM_SIZE as u32,
        ..SectionHeader::default()
    });

    let strtab_offset = out.len() as u32;
    out.extend_from_slice(&strtab.bytes);
    headers.push(SectionHeader {
        name: shstrtab.add(".strtab"),
        kind: SHT_STRTAB,
        offset: strtab_offset,
        size: strtab.bytes.len() as u32,
        align: 1,
        ..SectionHeader::default()
    });

    let shstrtab_name = shstrtab.add(".shstrtab");
    let shstrtab_offset = out.len() as u32;
    out.extend_from_slice(&shstrtab.bytes);
    headers.push(SectionHeader {
        name: shstrtab_name,
        kind: SHT_STRTAB,
        offset: shstrtab_offset,
        size: shstrtab.bytes.len() as u32,
        align: 1,
        ..SectionHeader::default()
    });

    pad_to(&mut out, 4);
    let shoff = out.len() as u32;
    for h in &headers {
        for field in [
            h.name, h.kind, h.flags, h.addr, h.offset, h.size, h.link, h.info, h.align, h.entsize,
        ] {
            put_u32(&mut out, field);
        }
    }

    // ===== ELF header =====
    let mut header = Vec::with_capacity(EHDR_SIZE);
    header.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
    header.resize(16, 0);
    put_u16(&mut header, 1); // ET_REL
    put_u16(&mut header, target.elf_machine());
    put_u32(&mut header, 1);
    put_u32(&mut header, 0);
    put_u32(&mut header, 0);
    put_u32(&mut header, shoff);
    put_u32(&mut header, 0);
    put_u16(&mut header, EHDR_SIZE as u16);
    put_u16(&mut header, 0);
    put_u16(&mut header, 0);
    put_u16(&mut header, SHDR_SIZE as u16);
    put_u16(&mut header, headers.len() as u16);
    put_u16(&mut header, (headers.len() - 1) as u16);
    out[..EHDR_SIZE].copy_from_slice(&header);

    log::debug!(
        "elf32: {} sections, {} symbols, {} bytes",
        headers.len(),
        count,
        out.len()
    );
    Ok(out)
}
