//! Canonicalization of high-level operations
//!
//! Folds integer operations whose operands are all constants, moves constants
//! of commutative operations to the right, and materializes constant operands
//! that the selected instructions cannot take as immediates: both sides of
//! eight-byte multiply and divide, the value of an eight-byte shift and the
//! left side of integer compares. Float constants stay in place and are read
//! from the literal pool.

use crate::error::CompileError;
use crate::ir::{ConditionCode, Instruction, IrOp, Operand, ValueType};
use crate::pipeline::{Capability, Constraint, MethodCompilation, Stage, StageContext};

pub struct CanonicalizeStage;

impl Stage for CanonicalizeStage {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Canonicalization)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("block-discovery"), Constraint::Before("enter-ssa")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, _ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        let mut folded = 0usize;
        for id in method.instructions.ids() {
            let instr = method.instructions.get(id);
            let Some(op) = instr.ir_op() else {
                continue;
            };
            let instr = instr.clone();
            method.track(&instr);

            if let Some(value) = fold(op, &instr) {
                let result = instr.results[0].clone();
                let replacement = Instruction::ir(IrOp::Move, vec![result.clone()], vec![value.with_type(result.ty)])
                    .at(instr.source_offset);
                method.instructions.replace(id, replacement);
                folded += 1;
                continue;
            }

            if op.is_commutative() && instr.operands.len() == 2 {
                if instr.operands[0].is_constant() && !instr.operands[1].is_constant() {
                    let swapped = vec![instr.operands[1].clone(), instr.operands[0].clone()];
                    method.instructions.set_operands(id, swapped);
                }
            }

            let mut operands = method.instructions.get(id).operands.clone();
            let mut materialized = false;
            for (index, operand) in operands.iter_mut().enumerate() {
                if !operand.is_constant() || !needs_slot(op, &instr, index) {
                    continue;
                }
                let temp = method.frame.allocate_temp(operand.ty);
                let copy = Instruction::ir(IrOp::Move, vec![temp.clone()], vec![operand.clone()])
                    .at(instr.source_offset);
                method.instructions.insert_before(id, copy);
                *operand = temp;
                materialized = true;
            }
            if materialized {
                method.instructions.set_operands(id, operands);
            }
        }
        if folded > 0 {
            log::trace!("{}: folded {} constant operations", method.method.name, folded);
        }
        Ok(())
    }
}

/// Whether constant operand `index` of `op` has to live in a frame slot
fn needs_slot(op: IrOp, instr: &Instruction, index: usize) -> bool {
    let long = instr.results.first().map_or(false, |r| r.ty.is_long());
    match op {
        IrOp::Mul | IrOp::DivSigned | IrOp::DivUnsigned | IrOp::RemSigned | IrOp::RemUnsigned => long,
        IrOp::ShiftLeft | IrOp::ShiftRightSigned | IrOp::ShiftRightUnsigned => long && index == 0,
        IrOp::IntegerCompare | IrOp::IntegerCompareBranch => index == 0,
        _ => false,
    }
}

/// Constant result of an instruction whose operands are all constants
fn fold(op: IrOp, instr: &Instruction) -> Option<Operand> {
    let result = instr.results.first()?;
    let values: Option<Vec<i64>> = instr.operands.iter().map(|o| o.constant_value()).collect();
    let values = values?;
    let ty = result.ty;

    match (op, values.as_slice()) {
        (IrOp::FloatNeg, [_]) => {
            let bits = instr.operands[0].bits()?;
            let sign = if ty.width == 4 { 1u64 << 31 } else { 1u64 << 63 };
            Some(Operand::new(crate::ir::OperandKind::Constant(bits ^ sign), ty))
        }
        _ if !ty.is_int() || instr.operands.iter().any(|o| o.ty.is_float()) => None,
        (IrOp::Neg, [a]) => Some(Operand::constant(fold_binary(IrOp::Sub, ty, 0, *a)?, ty)),
        (IrOp::Not, [a]) => Some(Operand::constant(!*a, ty)),
        (IrOp::IntegerCompare, [a, b]) => {
            let width = instr.operands[0].ty.promoted().width;
            let (a, b) = normalize(width, instr.condition?, *a, *b);
            let holds = instr.condition?.evaluate(a, b)?;
            Some(Operand::constant(i64::from(holds), ValueType::I4))
        }
        (_, [a, b]) => Some(Operand::constant(fold_binary(op, ty, *a, *b)?, ty)),
        _ => None,
    }
}

/// Re-extend 32-bit operands so the comparison sees their bits the right way
fn normalize(width: u8, condition: ConditionCode, a: i64, b: i64) -> (i64, i64) {
    if width == 8 {
        return (a, b);
    }
    if condition.is_unsigned() {
        (i64::from(a as u32), i64::from(b as u32))
    } else {
        (i64::from(a as i32), i64::from(b as i32))
    }
}

fn fold_binary(op: IrOp, ty: ValueType, a: i64, b: i64) -> Option<i64> {
    if ty.width == 8 {
        let count = (b & 63) as u32;
        return Some(match op {
            IrOp::Add => a.wrapping_add(b),
            IrOp::Sub => a.wrapping_sub(b),
            IrOp::Mul => a.wrapping_mul(b),
            IrOp::And => a & b,
            IrOp::Or => a | b,
            IrOp::Xor => a ^ b,
            IrOp::ShiftLeft => a.wrapping_shl(count),
            IrOp::ShiftRightSigned => a >> count,
            IrOp::ShiftRightUnsigned => ((a as u64) >> count) as i64,
            _ => return None,
        });
    }
    let (a, b) = (a as i32, b as i32);
    let count = (b & 31) as u32;
    let value = match op {
        IrOp::Add => a.wrapping_add(b),
        IrOp::Sub => a.wrapping_sub(b),
        IrOp::Mul => a.wrapping_mul(b),
        IrOp::And => a & b,
        IrOp::Or => a | b,
        IrOp::Xor => a ^ b,
        IrOp::ShiftLeft => a.wrapping_shl(count),
        IrOp::ShiftRightSigned => a >> count,
        IrOp::ShiftRightUnsigned => ((a as u32) >> count) as i32,
        _ => return None,
    };
    Some(i64::from(value))
}
