use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kiln_bytecode::{BytecodeWriter, ElementType, MethodDef, Opcode};
use kiln_compiler::ir::{ConditionCode, Instruction, LabelId, Operand, Register, ValueType, X86Op};
use kiln_compiler::x86::asm;
use kiln_compiler::{Compiler, CompilerConfig, MachineCodeEmitter};

fn straight_line(count: usize) -> Vec<Instruction> {
    let slot = Operand::memory(Register::EBP, -8, ValueType::I4);
    let mut code = Vec::with_capacity(count * 4 + 2);
    let top = LabelId(1);
    code.push(asm::label(top));
    for i in 0..count {
        code.push(asm::mov(asm::eax(), slot.clone()));
        code.push(asm::op(X86Op::Add, asm::eax(), asm::imm(i as i64)));
        code.push(asm::mov(slot.clone(), asm::eax()));
        code.push(asm::op(X86Op::Movsd, asm::xmm0(ValueType::R8), asm::literal(&Operand::f64(i as f64))));
    }
    code.push(asm::jcc(ConditionCode::Less, top));
    code
}

fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit");
    for count in [16usize, 256, 4096] {
        let code = straight_line(count);
        group.throughput(Throughput::Elements(code.len() as u64));
        group.bench_with_input(BenchmarkId::new("instructions", count), &code, |b, code| {
            b.iter(|| {
                let mut emitter = MachineCodeEmitter::new("Bench.Method", 8);
                for instr in code {
                    emitter.emit(black_box(instr)).unwrap();
                }
                emitter.finish().unwrap()
            });
        });
    }
    group.finish();
}

fn sum_method(index: u32) -> MethodDef {
    let mut w = BytecodeWriter::new();
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
    MethodDef::new(format!("Bench.Sum{}", index), 0x0600_0000 + index)
        .with_params(vec![ElementType::I4])
        .with_locals(vec![ElementType::I4])
        .returning(ElementType::I4)
        .with_code(w.finish().unwrap())
}

fn bench_compile(c: &mut Criterion) {
    let method = sum_method(0);
    let compiler = Compiler::new(CompilerConfig::default()).unwrap();
    c.bench_function("compile_method", |b| {
        b.iter(|| compiler.compile_method(black_box(&method)).unwrap());
    });

    let methods: Vec<MethodDef> = (0..512).map(sum_method).collect();
    let mut group = c.benchmark_group("compile_all");
    group.throughput(Throughput::Elements(methods.len() as u64));
    for workers in [1usize, 4] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &methods, |b, methods| {
            b.iter(|| {
                let compiler = Compiler::new(CompilerConfig {
                    workers,
                    emit_startup: false,
                    ..CompilerConfig::default()
                })
                .unwrap();
                compiler.compile_all(black_box(methods))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_emit, bench_compile);
criterion_main!(benches);
