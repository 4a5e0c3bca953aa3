//! SSE scalar sequences
//!
//! Float constants are read from the method's literal pool. Arithmetic on
//! mixed widths widens the single operand; compares on mixed widths narrow the
//! double one.

use super::asm::{self, eax, esp, imm, literal, stack_top};
use super::calls;
use super::lower::X86Lowering;
use crate::error::CompileError;
use crate::ir::{ConditionCode, Instruction, IrOp, LabelId, Operand, Register, ValueType, X86Op};

const TWO_POW_32: f64 = 4_294_967_296.0;

fn float_type(width: u8) -> ValueType {
    if width == 8 {
        ValueType::R8
    } else {
        ValueType::R4
    }
}

fn scalar(single: X86Op, double: X86Op, width: u8) -> X86Op {
    if width == 8 {
        double
    } else {
        single
    }
}

/// How a float compare is tested: operand swap, flag condition and whether it is an ordered compare
///
/// After `comis`/`ucomis` an unordered result sets ZF, PF and CF together, so
/// the "above" conditions are false for NaN and the "below" ones are true.
fn float_condition(cc: ConditionCode) -> Result<(bool, ConditionCode, bool), CompileError> {
    use ConditionCode::*;
    Ok(match cc {
        Equal => (false, Equal, false),
        NotEqual => (false, NotEqual, false),
        Greater => (false, UnsignedGreater, true),
        GreaterOrEqual => (false, UnsignedGreaterOrEqual, true),
        Less => (true, UnsignedGreater, true),
        LessOrEqual => (true, UnsignedGreaterOrEqual, true),
        UnsignedLess => (false, UnsignedLess, false),
        UnsignedLessOrEqual => (false, UnsignedLessOrEqual, false),
        UnsignedGreater => (true, UnsignedLess, false),
        UnsignedGreaterOrEqual => (true, UnsignedLessOrEqual, false),
        Parity | NoParity | Sign | NotSign => {
            return Err(CompileError::invariant(format!("{} does not compare floats", cc)))
        }
    })
}

impl X86Lowering<'_, '_> {
    /// Load `value` into `register` as a float of `width` bytes
    pub(super) fn load_xmm(&mut self, register: Register, value: &Operand, width: u8) {
        let dest = asm::reg(register, float_type(width));
        let src = literal(value);
        let op = match (value.ty.width, width) {
            (4, 8) => X86Op::Cvtss2sd,
            (8, 4) => X86Op::Cvtsd2ss,
            (_, w) => scalar(X86Op::Movss, X86Op::Movsd, w),
        };
        self.emit(asm::op(op, dest, src));
    }

    pub(super) fn store_xmm(&mut self, dest: &Operand, register: Register) {
        let op = scalar(X86Op::Movss, X86Op::Movsd, dest.ty.width);
        self.emit(asm::op(op, dest.clone(), asm::reg(register, dest.ty)));
    }

    /// Right-hand float operand at `width`: memory when it already has that width
    fn xmm_source(&mut self, value: &Operand, width: u8) -> Operand {
        if value.ty.width == width {
            literal(value)
        } else {
            self.load_xmm(Register::XMM1, value, width);
            asm::xmm1(float_type(width))
        }
    }

    pub(super) fn lower_float_binary(&mut self, op: IrOp, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let left = self.operand(instr, 0)?.clone();
        let right = self.operand(instr, 1)?.clone();
        let width = dest.ty.width;

        let x86 = match op {
            IrOp::FloatAdd => scalar(X86Op::Addss, X86Op::Addsd, width),
            IrOp::FloatSub => scalar(X86Op::Subss, X86Op::Subsd, width),
            IrOp::FloatMul => scalar(X86Op::Mulss, X86Op::Mulsd, width),
            IrOp::FloatDiv => scalar(X86Op::Divss, X86Op::Divsd, width),
            IrOp::FloatRem => return self.float_remainder(&dest, &left, &right),
            other => return Err(CompileError::invariant(format!("{} is not float arithmetic", other.name()))),
        };
        self.load_xmm(Register::XMM0, &left, width);
        let right = self.xmm_source(&right, width);
        self.emit(asm::op(x86, asm::xmm0(dest.ty), right));
        self.store_xmm(&dest, Register::XMM0);
        Ok(())
    }

    // fmod(double, double) with both arguments written straight to the stack
    fn float_remainder(&mut self, dest: &Operand, left: &Operand, right: &Operand) -> Result<(), CompileError> {
        self.emit(asm::op(X86Op::Sub, esp(), imm(16)));
        self.load_xmm(Register::XMM0, left, 8);
        self.emit(asm::op(X86Op::Movsd, stack_top(0, ValueType::R8), asm::xmm0(ValueType::R8)));
        self.load_xmm(Register::XMM0, right, 8);
        self.emit(asm::op(X86Op::Movsd, stack_top(8, ValueType::R8), asm::xmm0(ValueType::R8)));
        self.call_helper(calls::FMOD, 16);
        self.narrow_result(dest);
        Ok(())
    }

    /// Store a double returned in XMM0 into a slot of either float width
    fn narrow_result(&mut self, dest: &Operand) {
        if dest.ty.width == 4 {
            self.emit(asm::op(X86Op::Cvtsd2ss, asm::xmm0(ValueType::R4), asm::xmm0(ValueType::R8)));
        }
        self.store_xmm(dest, Register::XMM0);
    }

    pub(super) fn lower_float_neg(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        let sign = imm(0x8000_0000);
        if dest.ty.width == 8 {
            self.copy(&dest, &value);
            self.emit(asm::op(X86Op::Xor, dest.high(), sign));
        } else {
            match value.bits() {
                Some(bits) => self.emit(asm::mov(eax(), imm(i64::from(bits as u32)))),
                None => self.emit(asm::mov(eax(), value.with_type(ValueType::U4))),
            }
            self.emit(asm::op(X86Op::Xor, eax(), sign));
            self.emit(asm::mov(dest.with_type(ValueType::U4), eax()));
        }
        Ok(())
    }

    /// Emit the compare and return the flag condition to test
    fn float_flags(&mut self, instr: &Instruction) -> Result<ConditionCode, CompileError> {
        let mut left = self.operand(instr, 0)?.clone();
        let mut right = self.operand(instr, 1)?.clone();
        let (swap, flags, ordered) = float_condition(self.condition(instr)?)?;
        if swap {
            std::mem::swap(&mut left, &mut right);
        }
        let width = left.ty.width.min(right.ty.width);
        self.load_xmm(Register::XMM0, &left, width);
        let right = self.xmm_source(&right, width);
        let op = match (ordered, width) {
            (true, 8) => X86Op::Comisd,
            (true, _) => X86Op::Comiss,
            (false, 8) => X86Op::Ucomisd,
            (false, _) => X86Op::Ucomiss,
        };
        self.emit(asm::compare(op, asm::xmm0(float_type(width)), right));
        Ok(flags)
    }

    pub(super) fn lower_float_compare(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let flags = self.float_flags(instr)?;
        let al = asm::reg(Register::EAX, ValueType::U1);
        let cl = asm::reg(Register::ECX, ValueType::U1);
        match flags {
            // Equal only when ordered; not-equal also when unordered
            ConditionCode::Equal => {
                self.emit(asm::setcc(ConditionCode::Equal, Register::EAX));
                self.emit(asm::setcc(ConditionCode::NoParity, Register::ECX));
                self.emit(asm::op(X86Op::And, al.clone(), cl));
            }
            ConditionCode::NotEqual => {
                self.emit(asm::setcc(ConditionCode::NotEqual, Register::EAX));
                self.emit(asm::setcc(ConditionCode::Parity, Register::ECX));
                self.emit(asm::op(X86Op::Or, al.clone(), cl));
            }
            other => self.emit(asm::setcc(other, Register::EAX)),
        }
        self.emit(asm::op(X86Op::Movzx, eax(), al));
        self.store_gpr(&dest, Register::EAX);
        Ok(())
    }

    pub(super) fn lower_float_compare_branch(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let target = self.target(instr)?;
        let flags = self.float_flags(instr)?;
        match flags {
            ConditionCode::Equal => {
                let skip = self.new_label();
                self.emit(asm::jcc(ConditionCode::Parity, skip));
                self.emit(asm::jcc(ConditionCode::Equal, target));
                self.emit(asm::label(skip));
            }
            ConditionCode::NotEqual => {
                self.emit(asm::jcc(ConditionCode::Parity, target));
                self.emit(asm::jcc(ConditionCode::NotEqual, target));
            }
            other => self.emit(asm::jcc(other, target)),
        }
        Ok(())
    }

    pub(super) fn lower_int_to_float(&mut self, unsigned: bool, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        let width = dest.ty.width;

        if value.ty.width == 8 {
            self.push_value(&value);
            self.call_helper(if unsigned { calls::UL2D } else { calls::L2D }, 8);
            self.narrow_result(&dest);
            return Ok(());
        }

        if unsigned {
            // Convert as signed, then add 2^32 when the top bit was set
            let done: LabelId = self.new_label();
            self.load_gpr(Register::EAX, &value);
            self.emit(asm::op(X86Op::Cvtsi2sd, asm::xmm0(ValueType::R8), eax()));
            self.emit(asm::compare(X86Op::Test, eax(), eax()));
            self.emit(asm::jcc(ConditionCode::NotSign, done));
            let bias = literal(&Operand::f64(TWO_POW_32));
            self.emit(asm::op(X86Op::Addsd, asm::xmm0(ValueType::R8), bias));
            self.emit(asm::label(done));
            self.narrow_result(&dest);
            return Ok(());
        }

        let src = if value.is_constant() || value.ty.is_narrow() {
            self.load_gpr(Register::EAX, &value);
            eax()
        } else {
            value
        };
        let op = scalar(X86Op::Cvtsi2ss, X86Op::Cvtsi2sd, width);
        self.emit(asm::op(op, asm::xmm0(dest.ty), src));
        self.store_xmm(&dest, Register::XMM0);
        Ok(())
    }

    pub(super) fn lower_float_to_int(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();

        if dest.ty.width <= 4 && dest.ty.signed {
            let op = scalar(X86Op::Cvttss2si, X86Op::Cvttsd2si, value.ty.width);
            self.emit(asm::op(op, eax(), literal(&value)));
            self.store_gpr(&dest, Register::EAX);
            return Ok(());
        }

        // Unsigned and eight-byte results go through the runtime as a double
        self.emit(asm::op(X86Op::Sub, esp(), imm(8)));
        self.load_xmm(Register::XMM0, &value, 8);
        self.emit(asm::op(X86Op::Movsd, stack_top(0, ValueType::R8), asm::xmm0(ValueType::R8)));
        self.call_helper(calls::D2L, 8);
        self.store_returned(&dest);
        Ok(())
    }

    pub(super) fn lower_float_convert(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let dest = self.result(instr)?.clone();
        let value = self.operand(instr, 0)?.clone();
        if dest.ty.width == value.ty.width {
            self.copy(&dest, &value);
            return Ok(());
        }
        self.load_xmm(Register::XMM0, &value, dest.ty.width);
        self.store_xmm(&dest, Register::XMM0);
        Ok(())
    }
}
