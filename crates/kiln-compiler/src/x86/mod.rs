//! x86-32 backend
//!
//! [`LoweringStage`] replaces every IR instruction with a machine sequence
//! and adds the frame code; [`EmitStage`] encodes the result. Scratch
//! registers are EAX, ECX, EDX, XMM0 and XMM1. Values live in their frame
//! slots between sequences.

pub mod asm;
mod calls;
pub mod emitter;
pub mod encoding;
mod float;
pub mod frame;
mod long;
pub mod lower;

pub use calls::RUNTIME_HELPERS;
pub use emitter::{EmitStage, MachineCodeEmitter, MethodCode};
pub use lower::{LoweringStage, X86Lowering};
