//! Whole-image compilation: scheduling, merging and object output

mod support;

use kiln_bytecode::{CallTarget, ElementType, MethodDef, Opcode};
use kiln_compiler::{Compiler, CompilerConfig, ErrorCategory};
use kiln_object::{LinkType, SectionKind};
use support::body;

fn config(workers: usize) -> CompilerConfig {
    CompilerConfig {
        workers,
        emit_startup: false,
        ..CompilerConfig::default()
    }
}

/// A mix of straight-line, looping, long and float methods
fn corpus() -> Vec<MethodDef> {
    let mut methods = Vec::new();
    for i in 0..24u32 {
        let name = format!("Corpus.M{}", i);
        let token = 0x0600_0100 + i;
        let def = match i % 4 {
            0 => {
                let code = body(|w| {
                    w.ldarg(0).ldc_i4(i as i32).emit(Opcode::Mul).emit(Opcode::Ret);
                });
                MethodDef::new(name, token)
                    .with_params(vec![ElementType::I4])
                    .returning(ElementType::I4)
                    .with_code(code)
            }
            1 => {
                let code = body(|w| {
                    let top = w.new_label();
                    let done = w.new_label();
                    w.ldc_i4(0).stloc(0);
                    w.mark(top);
                    w.ldarg(0);
                    w.branch(Opcode::Brfalse, done).unwrap();
                    w.ldloc(0).ldarg(0).emit(Opcode::Add).stloc(0);
                    w.ldarg(0).ldc_i4(1).emit(Opcode::Sub).starg(0);
                    w.branch(Opcode::Br, top).unwrap();
                    w.mark(done);
                    w.ldloc(0).emit(Opcode::Ret);
                });
                MethodDef::new(name, token)
                    .with_params(vec![ElementType::I4])
                    .with_locals(vec![ElementType::I4])
                    .returning(ElementType::I4)
                    .with_code(code)
            }
            2 => {
                let code = body(|w| {
                    w.ldarg(0).ldarg(1).emit(Opcode::Div).emit(Opcode::Ret);
                });
                MethodDef::new(name, token)
                    .with_params(vec![ElementType::I8, ElementType::I8])
                    .returning(ElementType::I8)
                    .with_code(code)
            }
            _ => {
                let code = body(|w| {
                    w.ldarg(0).ldc_r8(0.5).emit(Opcode::Mul).emit(Opcode::Ret);
                });
                MethodDef::new(name, token)
                    .with_params(vec![ElementType::R8])
                    .returning(ElementType::R8)
                    .with_code(code)
            }
        };
        methods.push(def);
    }
    methods
}

#[test]
fn test_output_is_independent_of_worker_count() {
    let methods = corpus();
    let serial = Compiler::new(config(1)).unwrap();
    let parallel = Compiler::new(config(6)).unwrap();
    let a = serial.compile_all(&methods);
    let b = parallel.compile_all(&methods);
    assert!(a.is_success() && b.is_success());
    assert_eq!(a.methods, b.methods);

    let text_a = serial.image().lock().section(SectionKind::Text).data().to_vec();
    let text_b = parallel.image().lock().section(SectionKind::Text).data().to_vec();
    assert_eq!(text_a, text_b);
    assert_eq!(serial.object_bytes().unwrap(), parallel.object_bytes().unwrap());
}

#[test]
fn test_methods_are_placed_in_declaration_order() {
    let methods = corpus();
    let compiler = Compiler::new(config(4)).unwrap();
    let report = compiler.compile_all(&methods);
    let names: Vec<&str> = report.methods.iter().map(|m| m.name.as_str()).collect();
    let expected: Vec<&str> = methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, expected);

    for pair in report.methods.windows(2) {
        assert!(pair[1].offset >= pair[0].offset + pair[0].size);
        assert_eq!(pair[1].offset % 16, 0);
    }
}

#[test]
fn test_relocations_are_rebased_into_text() {
    let callee = MethodDef::new("Math.Square", 0x0600_0001)
        .with_params(vec![ElementType::I4])
        .returning(ElementType::I4)
        .with_code(body(|w| {
            w.ldarg(0).ldarg(0).emit(Opcode::Mul).emit(Opcode::Ret);
        }));
    let caller = MethodDef::new("Math.Quartic", 0x0600_0002)
        .with_params(vec![ElementType::I4])
        .returning(ElementType::I4)
        .with_call(0x0600_0001, CallTarget::new("Math.Square", vec![ElementType::I4], ElementType::I4))
        .with_code(body(|w| {
            w.ldarg(0).call(0x0600_0001).unwrap();
            w.call(0x0600_0001).unwrap();
            w.emit(Opcode::Ret);
        }));

    let compiler = Compiler::new(config(2)).unwrap();
    let report = compiler.compile_all(&[callee, caller]);
    assert!(report.is_success());
    let quartic = report.method("Math.Quartic").unwrap();
    assert_eq!(quartic.relocations, 2);

    let image = compiler.image().lock();
    let text = image.section(SectionKind::Text).data();
    let calls: Vec<_> = image.relocations().iter().filter(|r| r.symbol == "Math.Square").collect();
    assert_eq!(calls.len(), 2);
    for reloc in calls {
        assert_eq!(reloc.link_type, LinkType::Relative32);
        assert_eq!(reloc.addend, -4);
        assert!(reloc.offset > quartic.offset && reloc.offset < quartic.offset + quartic.size);
        assert_eq!(text[reloc.offset as usize - 1], 0xE8);
    }
    assert!(image.unresolved().is_empty());
}

#[test]
fn test_failures_do_not_stop_other_methods() {
    let mut methods = corpus();
    methods.insert(
        3,
        MethodDef::new("Broken.Underflow", 0x0600_0FFF)
            .returning(ElementType::I4)
            .with_code(vec![0x58, 0x2A]),
    );
    methods.insert(
        7,
        MethodDef::new("Broken.Token", 0x0600_0FFE).with_code(body(|w| {
            w.call(0x0A00_00AA).unwrap();
            w.emit(Opcode::Ret);
        })),
    );

    let compiler = Compiler::new(config(3)).unwrap();
    let report = compiler.compile_all(&methods);
    assert_eq!(report.methods.len(), 24);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].method, "Broken.Underflow");
    assert_eq!(report.failures[0].category, ErrorCategory::MalformedInput);
    assert_eq!(report.failures[1].method, "Broken.Token");
    assert_eq!(report.failures[1].offset, Some(0));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["failures"][0]["category"], "malformed_input");
    assert_eq!(json["methods"].as_array().unwrap().len(), 24);
}

#[test]
fn test_write_object_file() {
    let compiler = Compiler::new(CompilerConfig {
        entry_point: Some("Corpus.M0".to_string()),
        ..config(2)
    })
    .unwrap();
    let mut methods = corpus();
    methods.truncate(4);
    // emit_startup is off in `config`, so build the startup explicitly
    let report = compiler.compile_all(&methods);
    assert!(report.is_success());
    let startup = compiler.startup().build().unwrap();
    assert_eq!(startup.relocations.len(), 1);
    compiler.image().merge(startup.into_fragment(16)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kernel.o");
    compiler.write_object(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"\x7FELF");
    assert_eq!(bytes[4], 1, "ELFCLASS32");
    assert_eq!(bytes[5], 1, "little endian");
    assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 1, "ET_REL");
    assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 3, "EM_386");
    assert_eq!(bytes, compiler.object_bytes().unwrap());

    let image = compiler.image().lock();
    assert!(image.symbol("AssemblyInit").is_some());
    assert!(image.externals().contains("__kiln_ldiv"));
}
