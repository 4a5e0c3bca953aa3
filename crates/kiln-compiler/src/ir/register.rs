//! Physical x86 registers

use super::types::ValueType;
use std::fmt;

/// Register file a register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// 32-bit general purpose
    General,
    /// SSE register
    Xmm,
}

/// A physical register, numbered as in the ModR/M encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub class: RegisterClass,
    pub number: u8,
}

impl Register {
    pub const EAX: Register = Register::general(0);
    pub const ECX: Register = Register::general(1);
    pub const EDX: Register = Register::general(2);
    pub const EBX: Register = Register::general(3);
    pub const ESP: Register = Register::general(4);
    pub const EBP: Register = Register::general(5);
    pub const ESI: Register = Register::general(6);
    pub const EDI: Register = Register::general(7);

    pub const XMM0: Register = Register::xmm(0);
    pub const XMM1: Register = Register::xmm(1);

    pub const fn general(number: u8) -> Self {
        Register {
            class: RegisterClass::General,
            number,
        }
    }

    pub const fn xmm(number: u8) -> Self {
        Register {
            class: RegisterClass::Xmm,
            number,
        }
    }

    #[inline]
    pub fn is_xmm(self) -> bool {
        self.class == RegisterClass::Xmm
    }

    /// Assembler name of the register when accessed at `ty`'s width
    pub fn name_for(self, ty: ValueType) -> &'static str {
        const DWORD: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
        const WORD: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
        const BYTE: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
        const XMM: [&str; 8] = ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];
        let index = usize::from(self.number & 7);
        match self.class {
            RegisterClass::Xmm => XMM[index],
            RegisterClass::General => match ty.width {
                1 => BYTE[index],
                2 => WORD[index],
                _ => DWORD[index],
            },
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name_for(ValueType::I4))
    }
}
