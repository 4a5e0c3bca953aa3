use kiln_object::{
    Fragment, FragmentRelocation, LinkType, ObjectError, PatchKind, ProgramImage, SectionKind, Symbol, SymbolBinding,
    SymbolKind,
};

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

struct Sections<'a> {
    bytes: &'a [u8],
    shoff: usize,
    shnum: usize,
    shstrtab: usize,
}

impl<'a> Sections<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        let shoff = u32_at(bytes, 32) as usize;
        let shnum = u16_at(bytes, 48) as usize;
        let shstrndx = u16_at(bytes, 50) as usize;
        let shstrtab = u32_at(bytes, shoff + shstrndx * 40 + 16) as usize;
        Sections {
            bytes,
            shoff,
            shnum,
            shstrtab,
        }
    }

    fn field(&self, index: usize, field: usize) -> u32 {
        u32_at(self.bytes, self.shoff + index * 40 + field * 4)
    }

    fn name(&self, index: usize) -> String {
        string_at(self.bytes, self.shstrtab + self.field(index, 0) as usize)
    }

    fn find(&self, name: &str) -> usize {
        (0..self.shnum)
            .find(|&i| self.name(i) == name)
            .unwrap_or_else(|| panic!("no section {}", name))
    }
}

fn string_at(bytes: &[u8], at: usize) -> String {
    let end = bytes[at..].iter().position(|&b| b == 0).unwrap() + at;
    String::from_utf8(bytes[at..end].to_vec()).unwrap()
}

fn function(name: &str, bytes: Vec<u8>, calls: &[(u32, &str)]) -> Fragment {
    Fragment {
        symbol: name.to_string(),
        section: SectionKind::Text,
        kind: SymbolKind::Function,
        binding: SymbolBinding::Global,
        alignment: 16,
        bytes,
        relocations: calls
            .iter()
            .map(|&(offset, symbol)| FragmentRelocation {
                offset,
                link_type: LinkType::Relative32,
                symbol: symbol.to_string(),
                addend: -4,
            })
            .collect(),
    }
}

fn build_image() -> ProgramImage {
    let image = ProgramImage::new();
    // `start` references `worker`, which is merged afterwards
    image
        .merge(function("start", vec![0xE8, 0, 0, 0, 0, 0xE8, 0, 0, 0, 0, 0xC3], &[(1, "worker"), (6, "panic")]))
        .unwrap();
    image.merge(function("worker", vec![0x90, 0xC3], &[])).unwrap();

    let table = Fragment {
        symbol: "dispatch_table".to_string(),
        section: SectionKind::Data,
        kind: SymbolKind::Object,
        binding: SymbolBinding::Global,
        alignment: 4,
        bytes: vec![0; 8],
        relocations: vec![
            FragmentRelocation {
                offset: 0,
                link_type: LinkType::Absolute32,
                symbol: "start".to_string(),
                addend: 0,
            },
            FragmentRelocation {
                offset: 4,
                link_type: LinkType::Absolute32,
                symbol: "worker".to_string(),
                addend: 0,
            },
        ],
    };
    image.merge(table).unwrap();

    let banner = image.append(SectionKind::ROData, b"kiln\0", 1);
    image
        .define_symbol(Symbol {
            name: "banner".to_string(),
            section: SectionKind::ROData,
            offset: banner,
            size: 5,
            kind: SymbolKind::Object,
            binding: SymbolBinding::Local,
        })
        .unwrap();
    image.reserve(SectionKind::Bss, 4096, 16);
    image
}

#[test]
fn test_forward_references_resolve_at_write_time() {
    let image = build_image();
    assert!(matches!(image.write_elf32(), Err(ObjectError::UnresolvedSymbol { ref symbol, .. }) if symbol == "panic"));

    image.declare_external("panic");
    let bytes = image.write_elf32().unwrap();
    let sections = Sections::new(&bytes);

    let symtab = sections.find(".symtab");
    let strtab = sections.field(sections.field(symtab, 6) as usize, 4) as usize;
    let sym_off = sections.field(symtab, 4) as usize;
    let symbol_name = |index: u32| string_at(&bytes, strtab + u32_at(&bytes, sym_off + index as usize * 16) as usize);

    let rela = sections.find(".rela.text");
    let rela_off = sections.field(rela, 4) as usize;
    let mut targets = Vec::new();
    for i in 0..(sections.field(rela, 5) as usize / 12) {
        let info = u32_at(&bytes, rela_off + i * 12 + 4);
        targets.push((u32_at(&bytes, rela_off + i * 12), symbol_name(info >> 8), info & 0xFF));
    }
    assert_eq!(targets, vec![(1, "worker".to_string(), 2), (6, "panic".to_string(), 2)]);

    let rela = sections.find(".rela.data");
    let rela_off = sections.field(rela, 4) as usize;
    let second = u32_at(&bytes, rela_off + 12 + 4);
    assert_eq!(symbol_name(second >> 8), "worker");
    assert_eq!(second & 0xFF, 1);
}

#[test]
fn test_section_sizes_match_allocations() {
    let image = build_image();
    image.declare_external("panic");
    let bytes = image.write_elf32().unwrap();
    let sections = Sections::new(&bytes);

    assert_eq!(sections.field(sections.find(".text"), 5), 16 + 2);
    assert_eq!(sections.field(sections.find(".data"), 5), 8);
    assert_eq!(sections.field(sections.find(".rodata"), 5), 5);
    assert_eq!(sections.field(sections.find(".bss"), 5), 4096);
    assert_eq!(sections.field(sections.find(".text"), 8), 16);
}

#[test]
fn test_patch_then_write_to_file() {
    let image = build_image();
    image.declare_external("panic");
    image.apply_patch(SectionKind::Text, 16, PatchKind::I1, 0xCC).unwrap();
    assert!(image.apply_patch(SectionKind::Bss, 0, PatchKind::I4, 0).is_err());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.o");
    image.write_to_file(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let sections = Sections::new(&bytes);
    let text = sections.field(sections.find(".text"), 4) as usize;
    assert_eq!(&bytes[text + 16..text + 18], &[0xCC, 0xC3]);
    assert_eq!(bytes, image.write_elf32().unwrap());
}
