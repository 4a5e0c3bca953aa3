//! Instruction selection
//!
//! Every IR instruction is replaced by a fixed machine sequence. Values stay in
//! their frame slots; EAX, ECX, EDX, XMM0 and XMM1 are scratch within one
//! sequence and nothing is assumed about them between sequences. Eight-byte
//! integers, floats and calls live in the sibling modules.

use super::asm::{self, eax, ecx, edx, imm};
use super::frame;
use crate::error::CompileError;
use crate::ir::{
    self, Context, Instruction, Intrinsic, IrOp, IrVisitor, LabelId, Operand, Register, ValueType, X86Op,
};
use crate::pipeline::{Capability, Constraint, MethodCompilation, Stage, StageContext};

/// Lowers IR to x86 and adds the frame code
pub struct LoweringStage;

impl Stage for LoweringStage {
    fn name(&self) -> &'static str {
        "lowering"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Lowering)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("leave-ssa")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        // The frame was laid out by decoding
        ctx.decoded()?;
        let mut lowered = 0usize;
        for id in method.instructions.ids() {
            if method.instructions.get(id).ir_op().is_none() {
                continue;
            }
            let instr = method.instructions.clone_instruction(id);
            method.track(&instr);

            let mut lowering = X86Lowering::new(method, instr.source_offset);
            ir::accept(&mut lowering, &instr)?;
            let sequence = lowering.finish();
            log::trace!("{}: {} -> {} instructions", method.method.name, instr, sequence.len());
            Context::new(&mut method.instructions, id).replace_with_sequence(sequence);
            lowered += 1;
        }
        frame::insert_frame_code(method)?;
        log::debug!(
            "{}: lowered {} instructions, frame {} bytes",
            method.method.name,
            lowered,
            method.frame.size()
        );
        Ok(())
    }
}

/// Selects the machine sequence of one IR instruction
pub struct X86Lowering<'a, 'm> {
    method: &'a mut MethodCompilation<'m>,
    out: Vec<Instruction>,
    offset: Option<u32>,
}

impl<'a, 'm> X86Lowering<'a, 'm> {
    pub fn new(method: &'a mut MethodCompilation<'m>, offset: Option<u32>) -> Self {
        X86Lowering {
            method,
            out: Vec::new(),
            offset,
        }
    }

    pub fn finish(self) -> Vec<Instruction> {
        self.out
    }

    pub(super) fn emit(&mut self, instr: Instruction) {
        self.out.push(instr.at(self.offset));
    }

    pub(super) fn new_label(&mut self) -> LabelId {
        self.method.new_label()
    }

    // ===== Shared helpers =====

    /// Load an integer of four bytes or less into `register`, extended to 32 bits
    pub(super) fn load_gpr(&mut self, register: Register, value: &Operand) {
        let dest = asm::reg(register, ValueType::U4);
        if let Some(v) = value.constant_value() {
            self.emit(asm::mov(dest, imm(v)));
        } else if value.ty.is_narrow() {
            let op = if value.ty.signed { X86Op::Movsx } else { X86Op::Movzx };
            self.emit(asm::op(op, dest, value.clone()));
        } else {
            self.emit(asm::mov(dest, value.clone()));
        }
    }

    /// Store the low bytes of `register` at `dest`'s width
    pub(super) fn store_gpr(&mut self, dest: &Operand, register: Register) {
        self.emit(asm::mov(dest.clone(), asm::reg(register, dest.ty)));
    }

    /// Right-hand operand of a 32-bit ALU instruction; narrow values go through ECX
    pub(super) fn alu_source(&mut self, value: &Operand) -> Operand {
        if let Some(v) = value.constant_value() {
            imm(v)
        } else if value.ty.is_narrow() {
            self.load_gpr(Register::ECX, value);
            ecx()
        } else {
            value.clone()
        }
    }

    /// Write an integer constant to a slot of any width
    pub(super) fn store_constant(&mut self, dest: &Operand, bits: u64) {
        if dest.ty.width == 8 {
            self.emit(asm::mov(dest.low(), imm(i64::from(bits as u32))));
            self.emit(asm::mov(dest.high(), imm(i64::from((bits >> 32) as u32))));
        } else {
            let value = Operand::new(ir::OperandKind::Constant(bits), dest.ty);
            self.emit(asm::mov(dest.clone(), value));
        }
    }

    /// Copy between slots without interpreting the bits
    pub(super) fn copy(&mut self, dest: &Operand, src: &Operand) {
        if let Some(bits) = src.bits() {
            self.store_constant(dest, bits);
            return;
        }
        match dest.ty.width {
            8 => {
                self.emit(asm::op(X86Op::Movsd, asm::xmm0(ValueType::R8), src.clone()));
                self.emit(asm::op(X86Op::Movsd, dest.clone(), asm::xmm0(ValueType::R8)));
            }
            _ if dest.ty.is_float() => {
                self.emit(asm::op(X86Op::Movss, asm::xmm0(ValueType::R4), src.clone()));
                self.emit(asm::op(X86Op::Movss, dest.clone(), asm::xmm0(ValueType::R4)));
            }
            _ => {
                self.load_gpr(Register::EAX, src);
                self.store_gpr(dest, Register::EAX);
            }
        }
    }

    pub(super) fn result<'i>(&self, instr: &'i Instruction) -> Result<&'i Operand, CompileError> {
        instr
            .result()
            .ok_or_else(|| CompileError::invariant(format!("{} has no result", instr.opcode)))
    }

    pub(super) fn operand<'i>(&self, instr: &'i Instruction, index: usize) -> Result<&'i Operand, CompileError> {
        instr
            .operand(index)
            .ok_or_else(|| CompileError::invariant(format!("{} is missing operand {}", instr.opcode, index)))
    }

    pub(super) fn target(&self, instr: &Instruction) -> Result<LabelId, CompileError> {
        instr
            .target
            .ok_or_else(|| CompileError::invariant(format!("{} has no target", instr.opcode)))
    }

    pub(super) fn condition(&self, instr: &Instruction) -> Result<ir::ConditionCode, CompileError> {
        instr
            .condition
            .ok_or_else(|| CompileError::invariant(format!("{} has no condition", instr.opcode)))
    }

    /// `mov eax, a; cmp eax, b`
    pub(super) fn compare_words(&mut self, left: &Operand, right: &Operand) {
        self.load_gpr(Register::EAX, left);
        let right = self.alu_source(right);
        self.emit(asm::compare(X86Op::Cmp, eax(), right));
    }
}

fn alu_op(op: IrOp) -> Result<X86Op, CompileError> {
    Ok(match op {
        IrOp::Add => X86Op::Add,
        IrOp::Sub => X86Op::Sub,
        IrOp::And => X86Op::And,
        IrOp::Or => X86Op::Or,
        IrOp::Xor => X86Op::Xor,
        other => return Err(CompileError::invariant(format!("{} is not an ALU operation", other.name()))),
    })
}

fn shift_op(op: IrOp) -> Result<X86Op, CompileError> {
    Ok(match op {
        IrOp::ShiftLeft => X86Op::Shl,
        IrOp::ShiftRightSigned => X86Op::Sar,
        IrOp::ShiftRightUnsigned => X86Op::Shr,
        other => return Err(CompileError::invariant(format!("{} is not a shift", other.name()))),
    })
}

impl IrVisitor for X86Lowering<'_, '_> {
    fn visit_move(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let src = self.operand(instr, 0)?.clone();
        self.copy(&dest, &src);
        Ok(())
    }

    fn visit_load(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let address = self.operand(instr, 0)?.clone();
        let access = instr.access.unwrap_or(dest.ty);
        self.load_gpr(Register::EDX, &address);
        let memory = Operand::memory(Register::EDX, 0, access);
        match access.width {
            8 => {
                self.emit(asm::op(X86Op::Movsd, asm::xmm0(ValueType::R8), memory));
                self.emit(asm::op(X86Op::Movsd, dest, asm::xmm0(ValueType::R8)));
            }
            _ if access.is_float() => {
                self.emit(asm::op(X86Op::Movss, asm::xmm0(ValueType::R4), memory));
                self.emit(asm::op(X86Op::Movss, dest, asm::xmm0(ValueType::R4)));
            }
            _ => {
                self.load_gpr(Register::EAX, &memory);
                self.store_gpr(&dest, Register::EAX);
            }
        }
        Ok(())
    }

    fn visit_store(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let address = self.operand(instr, 0)?.clone();
        let value = self.operand(instr, 1)?.clone();
        let access = instr.access.unwrap_or(value.ty);
        self.load_gpr(Register::EDX, &address);
        let memory = Operand::memory(Register::EDX, 0, access);
        if let Some(bits) = value.bits() {
            self.store_constant(&memory, bits);
        } else if access.width == 8 {
            self.emit(asm::op(X86Op::Movsd, asm::xmm0(ValueType::R8), value));
            self.emit(asm::op(X86Op::Movsd, memory, asm::xmm0(ValueType::R8)));
        } else if access.is_float() {
            self.emit(asm::op(X86Op::Movss, asm::xmm0(ValueType::R4), value));
            self.emit(asm::op(X86Op::Movss, memory, asm::xmm0(ValueType::R4)));
        } else {
            self.load_gpr(Register::EAX, &value);
            self.store_gpr(&memory, Register::EAX);
        }
        Ok(())
    }

    fn visit_integer_binary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let left = self.operand(instr, 0)?.clone();
        let right = self.operand(instr, 1)?.clone();
        if dest.ty.is_long() {
            return self.long_binary(op, &dest, &left, &right);
        }

        self.load_gpr(Register::EAX, &left);
        if op == IrOp::Mul {
            let right = match right.constant_value() {
                Some(v) => {
                    self.emit(asm::mov(ecx(), imm(v)));
                    ecx()
                }
                None => self.alu_source(&right),
            };
            self.emit(asm::source(X86Op::Mul, right));
        } else {
            let right = self.alu_source(&right);
            self.emit(asm::op(alu_op(op)?, eax(), right));
        }
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    fn visit_division(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let left = self.operand(instr, 0)?.clone();
        let right = self.operand(instr, 1)?.clone();
        if dest.ty.is_long() {
            return self.long_division(op, &dest, &left, &right);
        }

        let signed = matches!(op, IrOp::DivSigned | IrOp::RemSigned);
        self.load_gpr(Register::EAX, &left);
        let divisor = if right.is_constant() || right.ty.is_narrow() {
            self.load_gpr(Register::ECX, &right);
            ecx()
        } else {
            right
        };
        if signed {
            self.emit(asm::plain(X86Op::Cdq));
            self.emit(asm::source(X86Op::IDiv, divisor));
        } else {
            self.emit(asm::op(X86Op::Xor, edx(), edx()));
            self.emit(asm::source(X86Op::Div, divisor));
        }
        let register = match op {
            IrOp::DivSigned | IrOp::DivUnsigned => Register::EAX,
            _ => Register::EDX,
        };
        self.store_gpr(&dest, register);
        Ok(())
    }

    fn visit_integer_unary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        if dest.ty.is_long() {
            return self.long_unary(op, &dest, &value);
        }
        let x86 = if op == IrOp::Neg { X86Op::Neg } else { X86Op::Not };
        self.load_gpr(Register::EAX, &value);
        self.emit(asm::unary(x86, eax()));
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    fn visit_shift(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        let count = self.operand(instr, 1)?.clone();
        if dest.ty.is_long() {
            return self.long_shift(op, &dest, &value, &count);
        }
        self.load_gpr(Register::EAX, &value);
        self.load_gpr(Register::ECX, &count);
        self.emit(asm::op(shift_op(op)?, eax(), asm::reg(Register::ECX, ValueType::U1)));
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    fn visit_float_binary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_binary(op, instr)
    }

    fn visit_float_neg(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_neg(instr)
    }

    fn visit_integer_compare(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let left = self.operand(instr, 0)?.clone();
        let right = self.operand(instr, 1)?.clone();
        let cc = self.condition(instr)?;
        if left.ty.is_long() {
            return self.long_compare(cc, &dest, &left, &right);
        }
        self.compare_words(&left, &right);
        self.emit(asm::setcc(cc, Register::EAX));
        self.emit(asm::op(X86Op::Movzx, eax(), asm::reg(Register::EAX, ValueType::U1)));
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    fn visit_float_compare(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_compare(instr)
    }

    fn visit_integer_compare_branch(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let left = self.operand(instr, 0)?.clone();
        let right = self.operand(instr, 1)?.clone();
        let cc = self.condition(instr)?;
        let target = self.target(instr)?;
        if left.ty.is_long() {
            return self.long_compare_branch(cc, &left, &right, target);
        }
        self.compare_words(&left, &right);
        self.emit(asm::jcc(cc, target));
        Ok(())
    }

    fn visit_float_compare_branch(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_compare_branch(instr)
    }

    fn visit_extend(&mut self, signed: bool, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        if value.ty.width == 8 {
            self.copy(&dest, &value);
            return Ok(());
        }
        let value = value.with_type(ValueType::int(value.ty.width, signed));
        if dest.ty.is_long() {
            return self.long_extend(signed, &dest, &value);
        }
        self.load_gpr(Register::EAX, &value);
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    fn visit_truncate(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?;
        let value = if value.ty.width == 8 { value.low() } else { value.clone() };
        self.copy(&dest, &value.with_type(value.ty.with_signed(dest.ty.signed)));
        Ok(())
    }

    fn visit_int_to_float(&mut self, unsigned: bool, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_int_to_float(unsigned, instr)
    }

    fn visit_float_to_int(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_to_int(instr)
    }

    fn visit_float_convert(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_float_convert(instr)
    }

    fn visit_jmp(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let target = self.target(instr)?;
        self.emit(asm::jmp(target));
        Ok(())
    }

    fn visit_return(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_return(instr)
    }

    fn visit_call(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_call(instr)
    }

    fn visit_break(&mut self, _instr: &Instruction) -> Result<(), CompileError> {
        self.emit(asm::plain(X86Op::Int3));
        Ok(())
    }

    fn visit_intrinsic(&mut self, intrinsic: Intrinsic, instr: &Instruction) -> Result<(), CompileError> {
        self.lower_intrinsic(intrinsic, instr)
    }
}
