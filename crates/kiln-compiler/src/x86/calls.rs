//! Calls, returns and intrinsics
//!
//! Arguments are pushed right to left and popped by the caller. Integer
//! results come back in EAX or EDX:EAX, float results in XMM0.

use super::asm::{self, esp, imm};
use super::lower::X86Lowering;
use crate::error::CompileError;
use crate::ir::{Instruction, Intrinsic, LabelId, Operand, Register, ValueType, X86Op};

pub const LDIV: &str = "__kiln_ldiv";
pub const ULDIV: &str = "__kiln_uldiv";
pub const LREM: &str = "__kiln_lrem";
pub const ULREM: &str = "__kiln_ulrem";
pub const L2D: &str = "__kiln_l2d";
pub const UL2D: &str = "__kiln_ul2d";
pub const D2L: &str = "__kiln_d2l";
pub const FMOD: &str = "__kiln_fmod";

/// Symbols generated code may call that the runtime must provide
pub const RUNTIME_HELPERS: &[&str] = &[LDIV, ULDIV, LREM, ULREM, L2D, UL2D, D2L, FMOD];

impl X86Lowering<'_, '_> {
    fn push_word(&mut self, word: &Operand) {
        if let Some(bits) = word.bits() {
            self.emit(asm::push(imm(i64::from(bits as u32))));
        } else if word.ty.is_narrow() {
            self.load_gpr(Register::EAX, word);
            self.emit(asm::push(asm::eax()));
        } else {
            self.emit(asm::push(word.with_type(ValueType::U4)));
        }
    }

    /// Push a value so that its low half ends up at the lower address
    pub(super) fn push_value(&mut self, value: &Operand) {
        if value.ty.width == 8 {
            self.push_word(&value.high());
            self.push_word(&value.low());
        } else {
            self.push_word(value);
        }
    }

    /// `call symbol` followed by popping `bytes` of arguments
    pub(super) fn call_helper(&mut self, symbol: &str, bytes: u32) {
        self.emit(asm::call(symbol));
        if bytes > 0 {
            self.emit(asm::op(X86Op::Add, esp(), imm(i64::from(bytes))));
        }
    }

    /// Move the call result from its return register into `dest`
    pub(super) fn store_returned(&mut self, dest: &Operand) {
        if dest.ty.is_float() {
            self.store_xmm(dest, Register::XMM0);
        } else if dest.ty.width == 8 {
            self.store_gpr(&dest.low(), Register::EAX);
            self.store_gpr(&dest.high(), Register::EDX);
        } else {
            self.store_gpr(dest, Register::EAX);
        }
    }

    pub(super) fn lower_call(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        let symbol = instr
            .call_target
            .clone()
            .ok_or_else(|| CompileError::invariant("call without a target symbol"))?;
        let mut bytes = 0;
        for arg in instr.operands.iter().rev() {
            self.push_value(arg);
            bytes += arg.ty.slot_size();
        }
        self.call_helper(&symbol, bytes);
        if let Some(dest) = instr.result() {
            self.store_returned(dest);
        }
        Ok(())
    }

    pub(super) fn lower_return(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        if let Some(value) = instr.operand(0) {
            if value.ty.is_float() {
                self.load_xmm(Register::XMM0, value, value.ty.width);
            } else if value.ty.width == 8 {
                self.load_gpr(Register::EAX, &value.low());
                self.load_gpr(Register::EDX, &value.high());
            } else {
                self.load_gpr(Register::EAX, value);
            }
        }
        self.emit(asm::jmp(LabelId::EPILOGUE));
        Ok(())
    }

    pub(super) fn lower_intrinsic(&mut self, intrinsic: Intrinsic, instr: &Instruction) -> Result<(), CompileError> {
        let plain = match intrinsic {
            Intrinsic::Cli => Some(X86Op::Cli),
            Intrinsic::Sti => Some(X86Op::Sti),
            Intrinsic::Hlt => Some(X86Op::Hlt),
            Intrinsic::Int3 => Some(X86Op::Int3),
            Intrinsic::Iretd => Some(X86Op::Iretd),
            _ => None,
        };
        if let Some(op) = plain {
            self.emit(asm::plain(op));
            return Ok(());
        }

        if intrinsic == Intrinsic::Rdmsr {
            let msr = self.operand(instr, 0)?.clone();
            let dest = self.result(instr)?.clone();
            self.load_gpr(Register::ECX, &msr);
            self.emit(asm::plain(X86Op::Rdmsr));
            self.store_returned(&dest);
            return Ok(());
        }

        let width = intrinsic
            .port_width()
            .ok_or_else(|| CompileError::invariant(format!("{:?} is not a port access", intrinsic)))?;
        let port = self.operand(instr, 0)?.clone();
        let dx = asm::reg(Register::EDX, ValueType::U2);
        let accumulator = asm::reg(Register::EAX, ValueType::int(width, false));
        self.load_gpr(Register::EDX, &port);

        if intrinsic.has_result() {
            let dest = self.result(instr)?.clone();
            self.emit(asm::op(X86Op::In, accumulator.clone(), dx));
            if width < 4 {
                self.emit(asm::op(X86Op::Movzx, asm::eax(), accumulator));
            }
            self.store_gpr(&dest, Register::EAX);
        } else {
            let value = self.operand(instr, 1)?.clone();
            self.load_gpr(Register::EAX, &value);
            self.emit(Instruction::x86(X86Op::Out, vec![], vec![dx, accumulator]));
        }
        Ok(())
    }
}
