//! Kiln Compiler
//!
//! Ahead-of-time compiler from stack bytecode to relocatable x86-32 code:
//! - **IR**: typed operands, the instruction arena, blocks and cursors (`ir` module)
//! - **Pipeline**: constraint-ordered stages per method (`pipeline` module)
//! - **Stages**: decoding, block discovery, canonicalization, dominance and SSA (`stages` module)
//! - **x86**: instruction selection, frame code and the machine code emitter (`x86` module)
//! - **Scheduler**: parallel compilation into a shared program image (`compiler` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_bytecode::{BytecodeWriter, ElementType, MethodDef, Opcode};
//! use kiln_compiler::{Compiler, CompilerConfig};
//!
//! let mut w = BytecodeWriter::new();
//! w.ldarg(0).ldarg(1).emit(Opcode::Add).emit(Opcode::Ret);
//! let add = MethodDef::new("Math.Add", 0x0600_0001)
//!     .with_params(vec![ElementType::I4, ElementType::I4])
//!     .returning(ElementType::I4)
//!     .with_code(w.finish()?);
//!
//! let compiler = Compiler::new(CompilerConfig::default())?;
//! let report = compiler.compile_all(&[add]);
//! println!("{}", report.to_json()?);
//! compiler.write_object("kernel.o")?;
//! ```

#![warn(rust_2018_idioms)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod stages;
pub mod startup;
pub mod x86;

pub use compiler::{CompileReport, CompiledMethod, Compiler, MethodFailure};
pub use config::{CompilerConfig, ConfigError};
pub use error::{CompileError, ErrorCategory};
pub use pipeline::{Capability, CodegenOptions, Constraint, MethodCompilation, Pipeline, PipelineError, Stage};
pub use stages::{default_pipeline, standard_stages};
pub use startup::StartupBuilder;
pub use x86::{MachineCodeEmitter, MethodCode, RUNTIME_HELPERS};
