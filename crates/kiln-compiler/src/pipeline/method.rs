//! Per-method compilation state threaded through every stage

use crate::ir::{BasicBlocks, Instruction, InstructionSet, LabelId, StackFrame};
use crate::x86::MethodCode;
use kiln_bytecode::MethodDef;

/// Code generation settings that affect a single method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Alignment of the literal pool after the method body
    pub literal_alignment: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions { literal_alignment: 8 }
    }
}

/// Where compilation currently is, reported when a method fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub stage: Option<&'static str>,
    pub offset: Option<u32>,
    pub opcode: Option<&'static str>,
}

/// Everything the stages share while compiling one method
#[derive(Debug)]
pub struct MethodCompilation<'m> {
    pub method: &'m MethodDef,
    pub options: CodegenOptions,
    pub instructions: InstructionSet,
    pub blocks: BasicBlocks,
    pub frame: StackFrame,
    /// Output of the emission stage
    pub code: Option<MethodCode>,
    pub position: Position,
    next_label: u32,
}

impl<'m> MethodCompilation<'m> {
    pub fn new(method: &'m MethodDef, options: CodegenOptions) -> Self {
        MethodCompilation {
            method,
            options,
            instructions: InstructionSet::new(),
            blocks: BasicBlocks::new(),
            frame: StackFrame::new(&[], &[]),
            code: None,
            position: Position::default(),
            next_label: LabelId::FIRST_TEMPORARY,
        }
    }

    /// Fresh label for code created after decoding
    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Record the instruction being processed for failure reports
    pub fn track(&mut self, instr: &Instruction) {
        self.position.offset = instr.source_offset;
        self.position.opcode = Some(instr.opcode.name());
    }

    /// Record a bytecode position for failure reports
    pub fn track_bytecode(&mut self, offset: usize, opcode: &'static str) {
        self.position.offset = Some(offset as u32);
        self.position.opcode = Some(opcode);
    }
}
