//! Bytecode decoding
//!
//! Simulates the evaluation stack over the decoded body and emits typed IR in
//! which every value lives in a frame slot. Loads of arguments and locals are
//! copied into fresh temporaries so a later store cannot change a value that
//! is still on the stack. Constants stay on the simulated stack as immediates.
//!
//! Values still on the stack at a block boundary are moved into merge
//! temporaries owned by the target block; every predecessor writes the same
//! temporaries, which enter-ssa later joins with phis. A `BlockStart` marker
//! is emitted at every leader. Block discovery turns them into blocks.

use crate::error::CompileError;
use crate::ir::{
    ConditionCode, Instruction, Intrinsic, IrOp, LabelId, Operand, TypeKind, ValueType,
};
use crate::pipeline::{Artifact, Capability, Constraint, MethodCompilation, Stage, StageContext};
use kiln_bytecode::{decode_method, DecodedInstr, ElementType, FlowControl, Immediate, Opcode};
use std::collections::{BTreeMap, BTreeSet};

/// What decoding learned about the method body
#[derive(Debug, Clone, Default)]
pub struct DecodeSummary {
    /// Block labels in layout order, prologue first
    pub leaders: Vec<LabelId>,
    /// Bytecode instructions decoded
    pub instruction_count: usize,
    /// Deepest evaluation stack seen
    pub max_stack: usize,
}

/// Turns bytecode into stack-slot IR
pub struct DecodeStage;

impl Stage for DecodeStage {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Decoding)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::Before("block-discovery")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        let summary = Decoder::new(method)?.run()?;
        log::debug!(
            "{}: decoded {} instructions into {} blocks",
            method.method.name,
            summary.instruction_count,
            summary.leaders.len()
        );
        ctx.publish(Artifact::Decoded(summary));
        Ok(())
    }
}

/// How control leaves a translated instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Falls through; the stack has not been handed to the next block yet
    Next,
    /// Falls through; merge moves for the next block are already emitted
    Flushed,
    /// Never falls through
    Exit,
}

struct Decoder<'a, 'm> {
    method: &'a mut MethodCompilation<'m>,
    instrs: Vec<DecodedInstr>,
    leaders: BTreeSet<usize>,
    entry_stacks: BTreeMap<usize, Vec<Operand>>,
    stack: Vec<Operand>,
    max_stack: usize,
    offset: usize,
    opcode: Opcode,
    code_len: usize,
}

fn value_type(element: ElementType, what: &str) -> Result<ValueType, CompileError> {
    ValueType::from_element(element).ok_or_else(|| CompileError::malformed(format!("{} has type void", what)))
}

/// Whether a value of type `value` may be used where `expected` is required
fn compatible(expected: ValueType, value: ValueType) -> bool {
    expected.kind == value.kind && (expected.is_float() || expected.promoted().width == value.promoted().width)
}

impl<'a, 'm> Decoder<'a, 'm> {
    fn new(method: &'a mut MethodCompilation<'m>) -> Result<Self, CompileError> {
        let def = method.method;
        if def.code.is_empty() {
            return Err(CompileError::malformed("method has no body"));
        }
        let params = def
            .params
            .iter()
            .enumerate()
            .map(|(i, &p)| value_type(p, &format!("parameter {}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let locals = def
            .locals
            .iter()
            .enumerate()
            .map(|(i, &l)| value_type(l, &format!("local {}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        method.frame = crate::ir::StackFrame::new(&params, &locals);

        let instrs = decode_method(&def.code)?;
        let mut leaders = BTreeSet::new();
        leaders.insert(0);
        for instr in &instrs {
            if let Some(target) = instr.branch_target() {
                leaders.insert(target);
            }
            if instr.opcode.is_terminator() && instr.next_offset() < def.code.len() {
                leaders.insert(instr.next_offset());
            }
        }

        Ok(Decoder {
            method,
            instrs,
            leaders,
            entry_stacks: BTreeMap::new(),
            stack: Vec::new(),
            max_stack: 0,
            offset: 0,
            opcode: Opcode::Nop,
            code_len: def.code.len(),
        })
    }

    fn run(mut self) -> Result<DecodeSummary, CompileError> {
        self.method.instructions.append(Instruction::block_start(LabelId::PROLOGUE));

        let instrs = std::mem::take(&mut self.instrs);
        let mut flow = Flow::Next;
        for instr in &instrs {
            self.offset = instr.offset;
            self.opcode = instr.opcode;
            self.method.track_bytecode(instr.offset, instr.opcode.name());

            if self.leaders.contains(&instr.offset) {
                if flow == Flow::Next {
                    self.flush_to(instr.offset)?;
                }
                self.stack = self.entry_stacks.get(&instr.offset).cloned().unwrap_or_default();
                self.method
                    .instructions
                    .append(Instruction::block_start(LabelId::at_offset(instr.offset)));
            }
            flow = self.translate(instr)?;
            self.max_stack = self.max_stack.max(self.stack.len());
        }
        if flow != Flow::Exit {
            return Err(self.error("control falls off the end of the method"));
        }

        let mut leaders = vec![LabelId::PROLOGUE];
        leaders.extend(self.leaders.iter().map(|&o| LabelId::at_offset(o)));
        Ok(DecodeSummary {
            leaders,
            instruction_count: instrs.len(),
            max_stack: self.max_stack,
        })
    }

    // ===== Helpers =====

    fn error(&self, reason: impl Into<String>) -> CompileError {
        CompileError::malformed_at(self.offset as u32, self.opcode.name(), reason)
    }

    fn emit(&mut self, instr: Instruction) {
        self.method.instructions.append(instr.at(Some(self.offset as u32)));
    }

    fn temp(&mut self, ty: ValueType) -> Operand {
        self.method.frame.allocate_temp(ty)
    }

    fn push(&mut self, value: Operand) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Operand, CompileError> {
        self.stack.pop().ok_or_else(|| self.error("evaluation stack underflow"))
    }

    /// Evaluate `op` into a fresh temporary and push it
    fn compute(&mut self, op: IrOp, ty: ValueType, operands: Vec<Operand>) -> Operand {
        let result = self.temp(ty);
        self.emit(Instruction::ir(op, vec![result.clone()], operands));
        self.push(result.clone());
        result
    }

    /// Hand the current stack to the block at `target`
    fn flush_to(&mut self, target: usize) -> Result<(), CompileError> {
        let entry = match self.entry_stacks.get(&target) {
            Some(entry) => {
                if entry.len() != self.stack.len() {
                    return Err(self.error(format!(
                        "stack depth {} does not match depth {} at IL_{:04X}",
                        self.stack.len(),
                        entry.len(),
                        target
                    )));
                }
                entry.clone()
            }
            None => {
                let types: Vec<ValueType> = self.stack.iter().map(|v| v.ty.promoted()).collect();
                let entry: Vec<Operand> = types.into_iter().map(|ty| self.temp(ty)).collect();
                self.entry_stacks.insert(target, entry.clone());
                entry
            }
        };
        let values = self.stack.clone();
        for (slot, value) in entry.into_iter().zip(values) {
            if !compatible(slot.ty, value.ty) || slot.ty.width != value.ty.promoted().width {
                return Err(self.error(format!("stack type mismatch at IL_{:04X}", target)));
            }
            self.emit(Instruction::ir(IrOp::Move, vec![slot], vec![value]));
        }
        Ok(())
    }

    // ===== Translation =====

    fn translate(&mut self, instr: &DecodedInstr) -> Result<Flow, CompileError> {
        use Opcode::*;
        match instr.opcode {
            Nop => {}
            Break => self.emit(Instruction::ir(IrOp::Break, vec![], vec![])),

            Ldarg_0 | Ldarg_1 | Ldarg_2 | Ldarg_3 | Ldarg_S | Ldarg => {
                let slot = self.variable(instr, true)?;
                self.load_variable(slot);
            }
            Ldloc_0 | Ldloc_1 | Ldloc_2 | Ldloc_3 | Ldloc_S | Ldloc => {
                let slot = self.variable(instr, false)?;
                self.load_variable(slot);
            }
            Starg_S | Starg => {
                let slot = self.variable(instr, true)?;
                self.store_variable(slot)?;
            }
            Stloc_0 | Stloc_1 | Stloc_2 | Stloc_3 | Stloc_S | Stloc => {
                let slot = self.variable(instr, false)?;
                self.store_variable(slot)?;
            }

            Ldnull => self.push(Operand::constant(0, ValueType::PTR)),
            Ldc_I4_M1 | Ldc_I4_0 | Ldc_I4_1 | Ldc_I4_2 | Ldc_I4_3 | Ldc_I4_4 | Ldc_I4_5 | Ldc_I4_6
            | Ldc_I4_7 | Ldc_I4_8 => {
                let value = instr.opcode.to_u16() as i32 - Ldc_I4_0.to_u16() as i32;
                self.push(Operand::i32(value));
            }
            Ldc_I4_S | Ldc_I4 | Ldc_I8 | Ldc_R4 | Ldc_R8 => {
                let constant = match instr.immediate {
                    Immediate::Int32(v) => Operand::i32(v),
                    Immediate::Int64(v) => Operand::constant(v, ValueType::I8),
                    Immediate::Float32(v) => Operand::f32(v),
                    Immediate::Float64(v) => Operand::f64(v),
                    _ => return Err(self.error("missing constant immediate")),
                };
                self.push(constant);
            }

            Dup => {
                let top = self.stack.last().cloned().ok_or_else(|| self.error("evaluation stack underflow"))?;
                if top.is_constant() {
                    self.push(top);
                } else {
                    self.compute(IrOp::Move, top.ty, vec![top.clone()]);
                }
            }
            Pop => {
                self.pop()?;
            }

            Add => self.binary(Some(IrOp::Add), Some(IrOp::FloatAdd))?,
            Sub => self.binary(Some(IrOp::Sub), Some(IrOp::FloatSub))?,
            Mul => self.binary(Some(IrOp::Mul), Some(IrOp::FloatMul))?,
            Div => self.binary(Some(IrOp::DivSigned), Some(IrOp::FloatDiv))?,
            Div_Un => self.binary(Some(IrOp::DivUnsigned), None)?,
            Rem => self.binary(Some(IrOp::RemSigned), Some(IrOp::FloatRem))?,
            Rem_Un => self.binary(Some(IrOp::RemUnsigned), None)?,
            And => self.binary(Some(IrOp::And), None)?,
            Or => self.binary(Some(IrOp::Or), None)?,
            Xor => self.binary(Some(IrOp::Xor), None)?,
            Shl => self.shift(IrOp::ShiftLeft)?,
            Shr => self.shift(IrOp::ShiftRightSigned)?,
            Shr_Un => self.shift(IrOp::ShiftRightUnsigned)?,
            Neg => {
                let value = self.pop()?;
                let op = if value.ty.is_float() { IrOp::FloatNeg } else { IrOp::Neg };
                self.compute(op, value.ty.promoted(), vec![value]);
            }
            Not => {
                let value = self.pop()?;
                if value.ty.is_float() {
                    return Err(self.error("bitwise not of a float"));
                }
                self.compute(IrOp::Not, value.ty.promoted(), vec![value]);
            }

            Conv_I1 => self.convert_narrow(1, true)?,
            Conv_U1 => self.convert_narrow(1, false)?,
            Conv_I2 => self.convert_narrow(2, true)?,
            Conv_U2 => self.convert_narrow(2, false)?,
            Conv_I4 | Conv_I => self.convert_word(true)?,
            Conv_U4 | Conv_U => self.convert_word(false)?,
            Conv_I8 => self.convert_long(true)?,
            Conv_U8 => self.convert_long(false)?,
            Conv_R4 => self.convert_float(ValueType::R4, false)?,
            Conv_R8 => self.convert_float(ValueType::R8, false)?,
            Conv_R_Un => self.convert_float(ValueType::R8, true)?,

            Ceq => self.compare(ConditionCode::Equal)?,
            Cgt => self.compare(ConditionCode::Greater)?,
            Cgt_Un => self.compare(ConditionCode::UnsignedGreater)?,
            Clt => self.compare(ConditionCode::Less)?,
            Clt_Un => self.compare(ConditionCode::UnsignedLess)?,

            Ldind_I1 => self.load_indirect(ValueType::I1)?,
            Ldind_U1 => self.load_indirect(ValueType::U1)?,
            Ldind_I2 => self.load_indirect(ValueType::I2)?,
            Ldind_U2 => self.load_indirect(ValueType::U2)?,
            Ldind_I4 | Ldind_I => self.load_indirect(ValueType::I4)?,
            Ldind_U4 => self.load_indirect(ValueType::U4)?,
            Ldind_I8 => self.load_indirect(ValueType::I8)?,
            Ldind_R4 => self.load_indirect(ValueType::R4)?,
            Ldind_R8 => self.load_indirect(ValueType::R8)?,
            Stind_I1 => self.store_indirect(ValueType::I1)?,
            Stind_I2 => self.store_indirect(ValueType::I2)?,
            Stind_I4 => self.store_indirect(ValueType::I4)?,
            Stind_I8 => self.store_indirect(ValueType::I8)?,
            Stind_R4 => self.store_indirect(ValueType::R4)?,
            Stind_R8 => self.store_indirect(ValueType::R8)?,

            Call => self.call(instr)?,
            Ret => {
                self.ret()?;
                return Ok(Flow::Exit);
            }

            Br_S | Br => {
                let target = self.target(instr)?;
                self.flush_to(target)?;
                self.emit(Instruction::ir(IrOp::Jmp, vec![], vec![]).with_target(LabelId::at_offset(target)));
                return Ok(Flow::Exit);
            }
            Brfalse_S | Brfalse => return self.branch_on_value(instr, ConditionCode::Equal),
            Brtrue_S | Brtrue => return self.branch_on_value(instr, ConditionCode::NotEqual),
            Beq_S | Beq => return self.branch_compare(instr, ConditionCode::Equal),
            Bne_Un_S | Bne_Un => return self.branch_compare(instr, ConditionCode::NotEqual),
            Bge_S | Bge => return self.branch_compare(instr, ConditionCode::GreaterOrEqual),
            Bgt_S | Bgt => return self.branch_compare(instr, ConditionCode::Greater),
            Ble_S | Ble => return self.branch_compare(instr, ConditionCode::LessOrEqual),
            Blt_S | Blt => return self.branch_compare(instr, ConditionCode::Less),
            Bge_Un_S | Bge_Un => return self.branch_compare(instr, ConditionCode::UnsignedGreaterOrEqual),
            Bgt_Un_S | Bgt_Un => return self.branch_compare(instr, ConditionCode::UnsignedGreater),
            Ble_Un_S | Ble_Un => return self.branch_compare(instr, ConditionCode::UnsignedLessOrEqual),
            Blt_Un_S | Blt_Un => return self.branch_compare(instr, ConditionCode::UnsignedLess),
        }
        debug_assert!(!matches!(instr.opcode.flow(), FlowControl::Branch | FlowControl::CondBranch));
        Ok(Flow::Next)
    }

    fn variable(&self, instr: &DecodedInstr, param: bool) -> Result<Operand, CompileError> {
        let index = instr.variable_index().ok_or_else(|| self.error("missing variable index"))?;
        let slot = if param {
            self.method.frame.param(index)
        } else {
            self.method.frame.local(index)
        };
        slot.cloned().ok_or_else(|| {
            let kind = if param { "argument" } else { "local" };
            self.error(format!("{} {} out of range", kind, index))
        })
    }

    fn target(&self, instr: &DecodedInstr) -> Result<usize, CompileError> {
        instr.branch_target().ok_or_else(|| self.error("missing branch target"))
    }

    fn load_variable(&mut self, source: Operand) {
        let op = if source.ty.is_narrow() {
            if source.ty.signed {
                IrOp::SignExtend
            } else {
                IrOp::ZeroExtend
            }
        } else {
            IrOp::Move
        };
        self.compute(op, source.ty.promoted(), vec![source]);
    }

    fn store_variable(&mut self, dest: Operand) -> Result<(), CompileError> {
        let value = self.pop()?;
        let value = self.coerce(value, dest.ty)?;
        let op = if dest.ty.is_narrow() { IrOp::Truncate } else { IrOp::Move };
        self.emit(Instruction::ir(op, vec![dest], vec![value]));
        Ok(())
    }

    /// Check `value` against `expected`, converting between float widths
    fn coerce(&mut self, value: Operand, expected: ValueType) -> Result<Operand, CompileError> {
        if !compatible(expected, value.ty) {
            return Err(self.error(format!("expected {} but found {}", expected, value.ty)));
        }
        if expected.is_float() && expected.width != value.ty.width {
            let converted = self.temp(expected);
            self.emit(Instruction::ir(IrOp::FloatConvert, vec![converted.clone()], vec![value]));
            return Ok(converted);
        }
        Ok(value)
    }

    fn binary(&mut self, int_op: Option<IrOp>, float_op: Option<IrOp>) -> Result<(), CompileError> {
        let right = self.pop()?;
        let left = self.pop()?;
        if left.ty.kind != right.ty.kind {
            return Err(self.error("operand type mismatch"));
        }
        if left.ty.is_int() && left.ty.promoted().width != right.ty.promoted().width {
            return Err(self.error("operand width mismatch"));
        }
        let ty = ValueType::binary_result(left.ty, right.ty);
        let op = match ty.kind {
            TypeKind::Int => int_op.ok_or_else(|| self.error("operation requires floats"))?,
            TypeKind::Float => float_op.ok_or_else(|| self.error("operation requires integers"))?,
        };
        self.compute(op, ty, vec![left, right]);
        Ok(())
    }

    fn shift(&mut self, op: IrOp) -> Result<(), CompileError> {
        let count = self.pop()?;
        let value = self.pop()?;
        if !value.ty.is_int() || !count.ty.is_int() || count.ty.width == 8 {
            return Err(self.error("shift requires an integer value and a 32-bit count"));
        }
        self.compute(op, value.ty.promoted(), vec![value, count]);
        Ok(())
    }

    fn compare(&mut self, condition: ConditionCode) -> Result<(), CompileError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let op = self.compare_op(&left, &right, IrOp::IntegerCompare, IrOp::FloatCompare)?;
        let result = self.temp(ValueType::I4);
        self.emit(Instruction::ir(op, vec![result.clone()], vec![left, right]).with_condition(condition));
        self.push(result);
        Ok(())
    }

    fn compare_op(&self, left: &Operand, right: &Operand, int: IrOp, float: IrOp) -> Result<IrOp, CompileError> {
        if left.ty.kind != right.ty.kind {
            return Err(self.error("compare of mismatched types"));
        }
        if left.ty.is_float() {
            return Ok(float);
        }
        if left.ty.promoted().width != right.ty.promoted().width {
            return Err(self.error("compare of mismatched widths"));
        }
        Ok(int)
    }

    fn branch_on_value(&mut self, instr: &DecodedInstr, condition: ConditionCode) -> Result<Flow, CompileError> {
        let value = self.pop()?;
        if value.ty.is_float() {
            return Err(self.error("branch on a float value"));
        }
        let zero = Operand::constant(0, value.ty.promoted());
        self.conditional_branch(instr, IrOp::IntegerCompareBranch, condition, vec![value, zero])
    }

    fn branch_compare(&mut self, instr: &DecodedInstr, condition: ConditionCode) -> Result<Flow, CompileError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let op = self.compare_op(&left, &right, IrOp::IntegerCompareBranch, IrOp::FloatCompareBranch)?;
        self.conditional_branch(instr, op, condition, vec![left, right])
    }

    fn conditional_branch(
        &mut self,
        instr: &DecodedInstr,
        op: IrOp,
        condition: ConditionCode,
        operands: Vec<Operand>,
    ) -> Result<Flow, CompileError> {
        let target = self.target(instr)?;
        let next = instr.next_offset();
        if next >= self.code_len {
            return Err(self.error("conditional branch falls off the end of the method"));
        }
        self.flush_to(target)?;
        self.flush_to(next)?;
        self.emit(
            Instruction::ir(op, vec![], operands)
                .with_condition(condition)
                .with_target(LabelId::at_offset(target)),
        );
        Ok(Flow::Flushed)
    }

    // ===== Conversions =====

    fn convert_narrow(&mut self, width: u8, signed: bool) -> Result<(), CompileError> {
        let value = self.pop()?;
        let result_ty = ValueType::int(4, signed);
        let narrow = ValueType::int(width, signed);
        let source = if value.ty.is_float() {
            let truncated = self.temp(ValueType::I4);
            self.emit(Instruction::ir(IrOp::FloatToInt, vec![truncated.clone()], vec![value]));
            truncated
        } else if let Some(v) = value.constant_value() {
            let extended = Operand::constant(v, narrow).constant_value().unwrap_or_default();
            self.push(Operand::constant(extended, result_ty));
            return Ok(());
        } else {
            value
        };
        let op = if signed { IrOp::SignExtend } else { IrOp::ZeroExtend };
        self.compute(op, result_ty, vec![source.with_type(narrow)]);
        Ok(())
    }

    fn convert_word(&mut self, signed: bool) -> Result<(), CompileError> {
        let value = self.pop()?;
        let ty = ValueType::int(4, signed);
        if value.ty.is_float() {
            self.compute(IrOp::FloatToInt, ty, vec![value]);
        } else if value.ty.width == 8 {
            match value.constant_value() {
                Some(v) => self.push(Operand::constant(v, ty)),
                None => {
                    self.compute(IrOp::Truncate, ty, vec![value]);
                }
            }
        } else {
            self.push(value.with_type(ty));
        }
        Ok(())
    }

    fn convert_long(&mut self, signed: bool) -> Result<(), CompileError> {
        let value = self.pop()?;
        let ty = ValueType::int(8, signed);
        if value.ty.is_float() {
            self.compute(IrOp::FloatToInt, ty, vec![value]);
        } else if value.ty.width == 8 {
            self.push(value.with_type(ty));
        } else {
            // The source is a stack int32: conv.i8 sign-extends, conv.u8 zero-extends
            let source = value.with_type(ValueType::int(4, signed));
            match source.constant_value() {
                Some(v) => self.push(Operand::constant(v, ty)),
                None => {
                    let op = if signed { IrOp::SignExtend } else { IrOp::ZeroExtend };
                    self.compute(op, ty, vec![source]);
                }
            }
        }
        Ok(())
    }

    fn convert_float(&mut self, ty: ValueType, unsigned_source: bool) -> Result<(), CompileError> {
        let value = self.pop()?;
        if value.ty.is_float() {
            if value.ty.width == ty.width {
                self.push(value);
            } else {
                self.compute(IrOp::FloatConvert, ty, vec![value]);
            }
            return Ok(());
        }
        let source = value.with_type(value.ty.promoted().with_signed(!unsigned_source));
        if let Some(v) = source.constant_value() {
            let float = if unsigned_source { v as u64 as f64 } else { v as f64 };
            self.push(if ty.width == 4 { Operand::f32(float as f32) } else { Operand::f64(float) });
            return Ok(());
        }
        let op = if unsigned_source { IrOp::UIntToFloat } else { IrOp::IntToFloat };
        self.compute(op, ty, vec![source]);
        Ok(())
    }

    // ===== Memory =====

    fn load_indirect(&mut self, access: ValueType) -> Result<(), CompileError> {
        let address = self.pop()?;
        if !compatible(ValueType::PTR, address.ty) {
            return Err(self.error("indirect load through a non-pointer"));
        }
        let result = self.temp(access.promoted());
        self.emit(Instruction::ir(IrOp::Load, vec![result.clone()], vec![address]).with_access(access));
        self.push(result);
        Ok(())
    }

    fn store_indirect(&mut self, access: ValueType) -> Result<(), CompileError> {
        let value = self.pop()?;
        let address = self.pop()?;
        if !compatible(ValueType::PTR, address.ty) {
            return Err(self.error("indirect store through a non-pointer"));
        }
        let value = self.coerce(value, access)?;
        self.emit(Instruction::ir(IrOp::Store, vec![], vec![address, value]).with_access(access));
        Ok(())
    }

    // ===== Calls and returns =====

    fn call(&mut self, instr: &DecodedInstr) -> Result<(), CompileError> {
        let token = match instr.immediate {
            Immediate::Token(token) => token,
            _ => return Err(self.error("missing call token")),
        };
        let def = self.method.method;
        let target = def
            .call_target(token)
            .ok_or_else(|| self.error(format!("unresolved call token {:#010x}", token)))?;

        let mut args = Vec::with_capacity(target.params.len());
        for _ in 0..target.params.len() {
            args.push(self.pop()?);
        }
        args.reverse();
        let mut operands = Vec::with_capacity(args.len());
        for (arg, &param) in args.into_iter().zip(&target.params) {
            let expected = value_type(param, "call parameter")?;
            operands.push(self.coerce(arg, expected.promoted())?);
        }

        let result = ValueType::from_element(target.ret).map(|ty| self.temp(ty.promoted()));
        let results: Vec<Operand> = result.iter().cloned().collect();

        let call = match Intrinsic::from_symbol(&target.symbol) {
            Some(intrinsic) => {
                let width_ok = match (intrinsic.result_width(), &result) {
                    (Some(width), Some(result)) => result.ty.width == width && result.ty.is_int(),
                    _ => true,
                };
                if intrinsic.arity() != operands.len() || intrinsic.has_result() != result.is_some() || !width_ok {
                    return Err(self.error(format!("bad signature for intrinsic {}", target.symbol)));
                }
                Instruction::ir(IrOp::Intrinsic(intrinsic), results, operands)
            }
            None => Instruction::ir(IrOp::Call, results, operands).with_call_target(target.symbol.clone()),
        };
        self.emit(call);
        if let Some(result) = result {
            self.push(result);
        }
        Ok(())
    }

    fn ret(&mut self) -> Result<(), CompileError> {
        let def = self.method.method;
        let operands = match ValueType::from_element(def.ret) {
            None => Vec::new(),
            Some(ty) => {
                let value = self.pop()?;
                let value = self.coerce(value, ty.promoted())?;
                let ty = if ty.is_int() { ty.promoted() } else { value.ty };
                vec![value.with_type(ty)]
            }
        };
        if !self.stack.is_empty() {
            return Err(self.error(format!("{} values left on the stack at return", self.stack.len())));
        }
        self.emit(Instruction::ir(IrOp::Return, vec![], operands));
        Ok(())
    }
}
