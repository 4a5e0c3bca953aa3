//! Kiln Bytecode Definitions
//!
//! This crate provides the input side of the kiln compiler:
//! - **Opcodes**: the stack-machine instruction set with operand shapes,
//!   flow control and stack effects (`opcode` module)
//! - **Decoder**: method body bytes to [`DecodedInstr`] lists (`decoder` module)
//! - **Metadata**: resolved method signatures and call targets (`method` module)
//! - **Writer**: label-aware body construction (`encoder` module)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod decoder;
pub mod encoder;
pub mod method;
pub mod opcode;
pub mod types;

pub use decoder::{decode_method, DecodeError, DecodedInstr, Immediate};
pub use encoder::{BytecodeWriter, EncodeError, Label};
pub use method::{CallTarget, MethodDef};
pub use opcode::{FlowControl, Opcode, OperandKind, StackEffect};
pub use types::ElementType;
