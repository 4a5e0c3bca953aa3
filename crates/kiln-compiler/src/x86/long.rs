//! Eight-byte integer sequences
//!
//! Values are handled as an EDX:EAX pair. Halves come from
//! [`Operand::low`]/[`Operand::high`], so slots, memory references and
//! constants all split the same way.

use super::asm::{self, eax, ecx, edx, imm};
use super::calls;
use super::lower::X86Lowering;
use crate::error::CompileError;
use crate::ir::{ConditionCode, IrOp, LabelId, Operand, Register, ValueType, X86Op};

impl X86Lowering<'_, '_> {
    fn load_pair(&mut self, value: &Operand) {
        self.load_gpr(Register::EAX, &value.low());
        self.load_gpr(Register::EDX, &value.high());
    }

    fn store_pair(&mut self, dest: &Operand) {
        self.store_gpr(&dest.low(), Register::EAX);
        self.store_gpr(&dest.high(), Register::EDX);
    }

    /// Operand of `mul`; a constant half goes through EDX, which `mul` overwrites anyway
    fn multiplier(&mut self, half: Operand) -> Operand {
        match half.constant_value() {
            Some(v) => {
                self.emit(asm::mov(edx(), imm(v)));
                edx()
            }
            None => half,
        }
    }

    pub(super) fn long_binary(
        &mut self,
        op: IrOp,
        dest: &Operand,
        left: &Operand,
        right: &Operand,
    ) -> Result<(), CompileError> {
        if op == IrOp::Mul {
            return self.long_multiply(dest, left, right);
        }
        let (low, high) = match op {
            IrOp::Add => (X86Op::Add, X86Op::Adc),
            IrOp::Sub => (X86Op::Sub, X86Op::Sbb),
            IrOp::And => (X86Op::And, X86Op::And),
            IrOp::Or => (X86Op::Or, X86Op::Or),
            IrOp::Xor => (X86Op::Xor, X86Op::Xor),
            other => return Err(CompileError::invariant(format!("{} has no pair form", other.name()))),
        };
        self.load_pair(left);
        let right_low = self.alu_source(&right.low());
        self.emit(asm::op(low, eax(), right_low));
        let right_high = self.alu_source(&right.high());
        self.emit(asm::op(high, edx(), right_high));
        self.store_pair(dest);
        Ok(())
    }

    // (a.hi*b.lo + a.lo*b.hi) << 32 + a.lo*b.lo, with the cross terms summed in ECX
    fn long_multiply(&mut self, dest: &Operand, left: &Operand, right: &Operand) -> Result<(), CompileError> {
        self.load_gpr(Register::EAX, &left.high());
        let b_low = self.multiplier(right.low());
        self.emit(asm::source(X86Op::Mul, b_low));
        self.emit(asm::mov(ecx(), eax()));

        self.load_gpr(Register::EAX, &left.low());
        let b_high = self.multiplier(right.high());
        self.emit(asm::source(X86Op::Mul, b_high));
        self.emit(asm::op(X86Op::Add, ecx(), eax()));

        self.load_gpr(Register::EAX, &left.low());
        let b_low = self.multiplier(right.low());
        self.emit(asm::source(X86Op::Mul, b_low));
        self.emit(asm::op(X86Op::Add, edx(), ecx()));
        self.store_pair(dest);
        Ok(())
    }

    pub(super) fn long_division(
        &mut self,
        op: IrOp,
        dest: &Operand,
        left: &Operand,
        right: &Operand,
    ) -> Result<(), CompileError> {
        let helper = match op {
            IrOp::DivSigned => calls::LDIV,
            IrOp::DivUnsigned => calls::ULDIV,
            IrOp::RemSigned => calls::LREM,
            IrOp::RemUnsigned => calls::ULREM,
            other => return Err(CompileError::invariant(format!("{} is not a division", other.name()))),
        };
        self.push_value(right);
        self.push_value(left);
        self.call_helper(helper, 16);
        self.store_pair(dest);
        Ok(())
    }

    pub(super) fn long_unary(&mut self, op: IrOp, dest: &Operand, value: &Operand) -> Result<(), CompileError> {
        self.load_pair(value);
        match op {
            IrOp::Neg => {
                self.emit(asm::unary(X86Op::Neg, eax()));
                self.emit(asm::op(X86Op::Adc, edx(), imm(0)));
                self.emit(asm::unary(X86Op::Neg, edx()));
            }
            IrOp::Not => {
                self.emit(asm::unary(X86Op::Not, eax()));
                self.emit(asm::unary(X86Op::Not, edx()));
            }
            other => return Err(CompileError::invariant(format!("{} is not unary", other.name()))),
        }
        self.store_pair(dest);
        Ok(())
    }

    /// Shift by CL; counts of 32 and above move one half into the other
    pub(super) fn long_shift(
        &mut self,
        op: IrOp,
        dest: &Operand,
        value: &Operand,
        count: &Operand,
    ) -> Result<(), CompileError> {
        let cl = asm::reg(Register::ECX, ValueType::U1);
        let small = self.new_label();
        self.load_pair(value);
        let count = if count.ty.is_long() { count.low() } else { count.clone() };
        self.load_gpr(Register::ECX, &count);

        match op {
            IrOp::ShiftLeft => {
                self.emit(asm::op(X86Op::Shld, edx(), eax()));
                self.emit(asm::op(X86Op::Shl, eax(), cl.clone()));
                self.emit(asm::compare(X86Op::Test, cl, imm(32)));
                self.emit(asm::jcc(ConditionCode::Equal, small));
                self.emit(asm::mov(edx(), eax()));
                self.emit(asm::op(X86Op::Xor, eax(), eax()));
            }
            IrOp::ShiftRightUnsigned | IrOp::ShiftRightSigned => {
                let signed = op == IrOp::ShiftRightSigned;
                let high = if signed { X86Op::Sar } else { X86Op::Shr };
                self.emit(asm::op(X86Op::Shrd, eax(), edx()));
                self.emit(asm::op(high, edx(), cl.clone()));
                self.emit(asm::compare(X86Op::Test, cl, imm(32)));
                self.emit(asm::jcc(ConditionCode::Equal, small));
                self.emit(asm::mov(eax(), edx()));
                if signed {
                    self.emit(asm::op(X86Op::Sar, edx(), imm(31)));
                } else {
                    self.emit(asm::op(X86Op::Xor, edx(), edx()));
                }
            }
            other => return Err(CompileError::invariant(format!("{} is not a shift", other.name()))),
        }
        self.emit(asm::label(small));
        self.store_pair(dest);
        Ok(())
    }

    pub(super) fn long_extend(&mut self, signed: bool, dest: &Operand, value: &Operand) -> Result<(), CompileError> {
        self.load_gpr(Register::EAX, value);
        self.store_gpr(&dest.low(), Register::EAX);
        if signed {
            self.emit(asm::plain(X86Op::Cdq));
            self.store_gpr(&dest.high(), Register::EDX);
        } else {
            self.emit(asm::mov(dest.high(), imm(0)));
        }
        Ok(())
    }

    /// Jump to `target` when `left cc right` holds; otherwise reach `fail` or fall through
    fn ladder(
        &mut self,
        cc: ConditionCode,
        left: &Operand,
        right: &Operand,
        target: LabelId,
        fail: LabelId,
    ) -> Result<(), CompileError> {
        use ConditionCode::*;
        self.compare_words(&left.high(), &right.high());
        match cc {
            Equal => self.emit(asm::jcc(NotEqual, fail)),
            NotEqual => self.emit(asm::jcc(NotEqual, target)),
            Less | LessOrEqual | Greater | GreaterOrEqual | UnsignedLess | UnsignedLessOrEqual | UnsignedGreater
            | UnsignedGreaterOrEqual => {
                let strict = match cc {
                    Less | LessOrEqual => Less,
                    Greater | GreaterOrEqual => Greater,
                    UnsignedLess | UnsignedLessOrEqual => UnsignedLess,
                    _ => UnsignedGreater,
                };
                self.emit(asm::jcc(strict, target));
                self.emit(asm::jcc(strict.mirror(), fail));
            }
            Parity | NoParity | Sign | NotSign => {
                return Err(CompileError::invariant(format!("{} does not compare eight-byte integers", cc)))
            }
        }
        self.compare_words(&left.low(), &right.low());
        // The low halves compare as unsigned whatever the signedness of the whole
        self.emit(asm::jcc(cc.unsigned(), target));
        Ok(())
    }

    pub(super) fn long_compare(
        &mut self,
        cc: ConditionCode,
        dest: &Operand,
        left: &Operand,
        right: &Operand,
    ) -> Result<(), CompileError> {
        let holds = self.new_label();
        let fails = self.new_label();
        let done = self.new_label();
        self.ladder(cc, left, right, holds, fails)?;
        self.emit(asm::label(fails));
        self.store_constant(dest, 0);
        self.emit(asm::jmp(done));
        self.emit(asm::label(holds));
        self.store_constant(dest, 1);
        self.emit(asm::label(done));
        Ok(())
    }

    pub(super) fn long_compare_branch(
        &mut self,
        cc: ConditionCode,
        left: &Operand,
        right: &Operand,
        target: LabelId,
    ) -> Result<(), CompileError> {
        let skip = self.new_label();
        self.ladder(cc, left, right, target, skip)?;
        self.emit(asm::label(skip));
        Ok(())
    }
}
