//! Shared helpers for the integration tests
#![allow(dead_code)]

pub mod ia32;

use ia32::Machine;
use kiln_bytecode::{BytecodeWriter, ElementType, MethodDef};
use kiln_compiler::{Compiler, CompilerConfig, MethodCode};

/// Build a method body with the writer
pub fn body(build: impl FnOnce(&mut BytecodeWriter)) -> Vec<u8> {
    let mut writer = BytecodeWriter::new();
    build(&mut writer);
    writer.finish().expect("body should encode")
}

pub fn method(name: &str, params: Vec<ElementType>, ret: ElementType, code: Vec<u8>) -> MethodDef {
    MethodDef::new(name, 0x0600_0001)
        .with_params(params)
        .returning(ret)
        .with_code(code)
}

pub fn compile(def: &MethodDef) -> MethodCode {
    let compiler = Compiler::new(CompilerConfig::default()).expect("default pipeline");
    compiler
        .compile_method(def)
        .unwrap_or_else(|failure| panic!("{} failed to compile: {}", def.name, failure))
}

/// Compile `def`, load it with the runtime helpers and run it once
pub fn run(def: &MethodDef, args: &[u32]) -> Machine {
    let mut machine = Machine::load(&compile(def));
    ia32::install_runtime(&mut machine);
    machine.call(args).unwrap_or_else(|e| panic!("{} faulted: {}", def.name, e));
    machine
}

/// Split 64-bit arguments into little-endian words
pub fn words64(values: &[u64]) -> Vec<u32> {
    values.iter().flat_map(|&v| [v as u32, (v >> 32) as u32]).collect()
}
