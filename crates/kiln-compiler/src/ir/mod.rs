//! Intermediate representation shared by all stages
//!
//! A method is one [`InstructionSet`] partitioned into [`BasicBlocks`]. Stages
//! rewrite instructions in place through a [`Context`]; blocks are created
//! once and only their contents change afterwards.

pub mod block;
pub mod condition;
pub mod context;
pub mod frame;
pub mod instruction;
pub mod instruction_set;
pub mod opcode;
pub mod operand;
pub mod register;
pub mod types;
pub mod visitor;

pub use block::{BasicBlock, BasicBlocks, BlockId};
pub use condition::ConditionCode;
pub use context::Context;
pub use frame::{StackFrame, TOKEN_OFFSET};
pub use instruction::Instruction;
pub use instruction_set::{InstrId, InstructionSet};
pub use opcode::{Intrinsic, IrOp, Opcode, X86Op};
pub use operand::{LabelId, MemoryRef, Operand, OperandKind, SlotKey, SlotOrigin, StackSlot};
pub use register::{Register, RegisterClass};
pub use types::{TypeKind, ValueType};
pub use visitor::{accept, IrVisitor};
