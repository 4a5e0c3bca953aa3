//! A single IR or machine instruction

use super::block::BlockId;
use super::condition::ConditionCode;
use super::opcode::{IrOp, Opcode, X86Op};
use super::operand::{LabelId, Operand};
use super::types::ValueType;
use std::fmt;

/// Instruction stored in an [`InstructionSet`](super::InstructionSet)
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub results: Vec<Operand>,
    pub operands: Vec<Operand>,
    /// Compare and conditional-branch condition
    pub condition: Option<ConditionCode>,
    /// Branch target, block label or defined label
    pub target: Option<LabelId>,
    /// Callee symbol
    pub call_target: Option<String>,
    /// Memory access type of `Load`/`Store`
    pub access: Option<ValueType>,
    /// Incoming blocks of a `Phi`, parallel to `operands`
    pub phi_blocks: Vec<BlockId>,
    /// Owning block of a marker
    pub block: Option<BlockId>,
    /// Bytecode offset this instruction came from
    pub source_offset: Option<u32>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            results: Vec::new(),
            operands: Vec::new(),
            condition: None,
            target: None,
            call_target: None,
            access: None,
            phi_blocks: Vec::new(),
            block: None,
            source_offset: None,
        }
    }

    /// IR instruction with results and operands
    pub fn ir(op: IrOp, results: Vec<Operand>, operands: Vec<Operand>) -> Self {
        Instruction {
            results,
            operands,
            ..Instruction::new(Opcode::Ir(op))
        }
    }

    /// Machine instruction with results and operands
    pub fn x86(op: X86Op, results: Vec<Operand>, operands: Vec<Operand>) -> Self {
        Instruction {
            results,
            operands,
            ..Instruction::new(Opcode::X86(op))
        }
    }

    /// Block start marker carrying the block label
    pub fn block_start(label: LabelId) -> Self {
        Instruction {
            target: Some(label),
            ..Instruction::new(Opcode::BlockStart)
        }
    }

    pub fn block_end() -> Self {
        Instruction::new(Opcode::BlockEnd)
    }

    // ===== Builders =====

    pub fn with_condition(mut self, condition: ConditionCode) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_target(mut self, label: LabelId) -> Self {
        self.target = Some(label);
        self
    }

    pub fn with_call_target(mut self, symbol: impl Into<String>) -> Self {
        self.call_target = Some(symbol.into());
        self
    }

    pub fn with_access(mut self, ty: ValueType) -> Self {
        self.access = Some(ty);
        self
    }

    pub fn at(mut self, offset: Option<u32>) -> Self {
        self.source_offset = offset;
        self
    }

    // ===== Queries =====

    pub fn ir_op(&self) -> Option<IrOp> {
        match self.opcode {
            Opcode::Ir(op) => Some(op),
            _ => None,
        }
    }

    pub fn x86_op(&self) -> Option<X86Op> {
        match self.opcode {
            Opcode::X86(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::Ir(IrOp::Phi)
    }

    pub fn result(&self) -> Option<&Operand> {
        self.results.first()
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.results.is_empty() {
            for (i, result) in self.results.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", result)?;
            }
            f.write_str(" = ")?;
        }
        f.write_str(self.opcode.name())?;
        if let Some(cc) = self.condition {
            write!(f, ".{}", cc)?;
        }
        for (i, operand) in self.operands.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{}", operand)?;
            if let Some(block) = self.phi_blocks.get(i) {
                write!(f, " from {}", block)?;
            }
        }
        if let Some(target) = self.target {
            write!(f, " -> {}", target)?;
        }
        if let Some(callee) = &self.call_target {
            write!(f, " @{}", callee)?;
        }
        Ok(())
    }
}
