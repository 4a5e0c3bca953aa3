//! Double dispatch from IR opcodes to an instruction selector
//!
//! [`accept`] decodes the opcode of an IR instruction and calls the matching
//! [`IrVisitor`] method; a target implements the visitor once per platform.

use super::instruction::Instruction;
use super::opcode::{Intrinsic, IrOp};
use crate::error::CompileError;

pub trait IrVisitor {
    fn visit_move(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_load(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_store(&mut self, instr: &Instruction) -> Result<(), CompileError>;

    /// `Add`, `Sub`, `Mul`, `And`, `Or` and `Xor`
    fn visit_integer_binary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError>;
    /// Signed and unsigned divide and remainder
    fn visit_division(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError>;
    /// `Neg` and `Not`
    fn visit_integer_unary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_shift(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError>;

    fn visit_float_binary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_float_neg(&mut self, instr: &Instruction) -> Result<(), CompileError>;

    fn visit_integer_compare(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_float_compare(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_integer_compare_branch(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_float_compare_branch(&mut self, instr: &Instruction) -> Result<(), CompileError>;

    fn visit_extend(&mut self, signed: bool, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_truncate(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_int_to_float(&mut self, unsigned: bool, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_float_to_int(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_float_convert(&mut self, instr: &Instruction) -> Result<(), CompileError>;

    fn visit_jmp(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_return(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_call(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_break(&mut self, instr: &Instruction) -> Result<(), CompileError>;
    fn visit_intrinsic(&mut self, intrinsic: Intrinsic, instr: &Instruction) -> Result<(), CompileError>;
}

/// Dispatch `instr` to the visitor method for its opcode
pub fn accept<V: IrVisitor + ?Sized>(visitor: &mut V, instr: &Instruction) -> Result<(), CompileError> {
    use IrOp::*;
    let op = instr
        .ir_op()
        .ok_or_else(|| CompileError::invariant(format!("{} is not an IR instruction", instr.opcode)))?;
    match op {
        Move => visitor.visit_move(instr),
        Load => visitor.visit_load(instr),
        Store => visitor.visit_store(instr),
        Add | Sub | Mul | And | Or | Xor => visitor.visit_integer_binary(op, instr),
        DivSigned | DivUnsigned | RemSigned | RemUnsigned => visitor.visit_division(op, instr),
        Neg | Not => visitor.visit_integer_unary(op, instr),
        ShiftLeft | ShiftRightSigned | ShiftRightUnsigned => visitor.visit_shift(op, instr),
        FloatAdd | FloatSub | FloatMul | FloatDiv | FloatRem => visitor.visit_float_binary(op, instr),
        FloatNeg => visitor.visit_float_neg(instr),
        IntegerCompare => visitor.visit_integer_compare(instr),
        FloatCompare => visitor.visit_float_compare(instr),
        IntegerCompareBranch => visitor.visit_integer_compare_branch(instr),
        FloatCompareBranch => visitor.visit_float_compare_branch(instr),
        SignExtend => visitor.visit_extend(true, instr),
        ZeroExtend => visitor.visit_extend(false, instr),
        Truncate => visitor.visit_truncate(instr),
        IntToFloat => visitor.visit_int_to_float(false, instr),
        UIntToFloat => visitor.visit_int_to_float(true, instr),
        FloatToInt => visitor.visit_float_to_int(instr),
        FloatConvert => visitor.visit_float_convert(instr),
        Jmp => visitor.visit_jmp(instr),
        Return => visitor.visit_return(instr),
        Call => visitor.visit_call(instr),
        Break => visitor.visit_break(instr),
        IrOp::Intrinsic(intrinsic) => visitor.visit_intrinsic(intrinsic, instr),
        Phi => Err(CompileError::invariant("phi survived SSA destruction")),
    }
}
