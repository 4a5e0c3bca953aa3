//! Encoding tables
//!
//! Each mnemonic maps to a list of [`CodeDef`]s tried in order; the first
//! entry whose operand shapes and width match wins, so specific forms come
//! before general ones. A mnemonic with no matching entry cannot be encoded.

use crate::ir::{Operand, OperandKind, Register, X86Op};

/// Operand shape accepted by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    None,
    /// General register
    Gpr,
    /// EAX, AX or AL
    Acc,
    /// CL
    Cl,
    /// DX
    Dx,
    Xmm,
    /// Any memory form: frame slot, memory reference or literal
    Mem,
    /// General register or memory
    RmGpr,
    /// XMM register or memory
    RmXmm,
    Imm,
    Label,
    Symbol,
}

impl Shape {
    pub fn matches(self, operand: Option<&Operand>) -> bool {
        let Some(operand) = operand else {
            return self == Shape::None;
        };
        let general = |r: &Register| !r.is_xmm();
        match (self, &operand.kind) {
            (Shape::Gpr, OperandKind::Register(r)) => general(r),
            (Shape::Acc, OperandKind::Register(r)) => *r == Register::EAX,
            (Shape::Cl, OperandKind::Register(r)) => *r == Register::ECX,
            (Shape::Dx, OperandKind::Register(r)) => *r == Register::EDX,
            (Shape::Xmm, OperandKind::Register(r)) => r.is_xmm(),
            (Shape::RmGpr, OperandKind::Register(r)) => general(r),
            (Shape::RmXmm, OperandKind::Register(r)) => r.is_xmm(),
            (Shape::Mem | Shape::RmGpr | Shape::RmXmm, _) => operand.is_memory(),
            (Shape::Imm, OperandKind::Constant(_)) => true,
            (Shape::Label, OperandKind::Label(_)) => true,
            (Shape::Symbol, OperandKind::Symbol(_)) => true,
            _ => false,
        }
    }
}

/// How the bytes after the opcode are formed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// Opcode bytes only
    Fixed,
    /// Destination register added to the last opcode byte
    PlusReg,
    /// ModR/M with a fixed reg field; r/m is the destination
    Digit(u8),
    /// ModR/M with the destination in reg and the source in r/m
    RegDest,
    /// ModR/M with the source in reg and the destination in r/m
    RegSrc,
    /// 32-bit displacement to a label
    Rel32,
    /// 32-bit displacement to a symbol, resolved by relocation
    Call,
}

/// One encoding of a mnemonic
#[derive(Debug, Clone, Copy)]
pub struct CodeDef {
    pub dest: Shape,
    pub src: Shape,
    /// Operand width in bytes; 0 accepts any
    pub width: u8,
    pub opcode: &'static [u8],
    pub form: Form,
    /// Immediate size in bytes
    pub imm: u8,
    /// Add the condition code to the last opcode byte
    pub cc: bool,
}

impl CodeDef {
    const fn new(dest: Shape, src: Shape, width: u8, opcode: &'static [u8], form: Form) -> Self {
        CodeDef {
            dest,
            src,
            width,
            opcode,
            form,
            imm: 0,
            cc: false,
        }
    }

    const fn imm(mut self, size: u8) -> Self {
        self.imm = size;
        self
    }

    const fn cc(mut self) -> Self {
        self.cc = true;
        self
    }

    pub fn matches(&self, dest: Option<&Operand>, src: Option<&Operand>, width: u8) -> bool {
        (self.width == 0 || self.width == width) && self.dest.matches(dest) && self.src.matches(src)
    }
}

use Form::*;
use Shape::{Acc, Cl, Dx, Gpr, Imm, Label, Mem, RmGpr, RmXmm, Symbol, Xmm};

const NONE: Shape = Shape::None;

/// Which operand decides the instruction width
pub fn width_operand(op: X86Op) -> WidthFrom {
    match op {
        X86Op::Movzx | X86Op::Movsx | X86Op::Out => WidthFrom::Src,
        _ => WidthFrom::Dest,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthFrom {
    Dest,
    Src,
}

macro_rules! alu {
    ($name:ident, $digit:expr, $r_rm:expr, $rm_r:expr) => {
        const $name: &[CodeDef] = &[
            CodeDef::new(RmGpr, Imm, 4, &[0x81], Digit($digit)).imm(4),
            CodeDef::new(Gpr, RmGpr, 4, &[$r_rm], RegDest),
            CodeDef::new(RmGpr, Gpr, 4, &[$rm_r], RegSrc),
            CodeDef::new(RmGpr, Imm, 2, &[0x66, 0x81], Digit($digit)).imm(2),
            CodeDef::new(Gpr, RmGpr, 2, &[0x66, $r_rm], RegDest),
            CodeDef::new(RmGpr, Gpr, 2, &[0x66, $rm_r], RegSrc),
            CodeDef::new(RmGpr, Imm, 1, &[0x80], Digit($digit)).imm(1),
            CodeDef::new(Gpr, RmGpr, 1, &[$r_rm - 1], RegDest),
            CodeDef::new(RmGpr, Gpr, 1, &[$rm_r - 1], RegSrc),
        ];
    };
}

alu!(ADD, 0, 0x03, 0x01);
alu!(OR, 1, 0x0B, 0x09);
alu!(ADC, 2, 0x13, 0x11);
alu!(SBB, 3, 0x1B, 0x19);
alu!(AND, 4, 0x23, 0x21);
alu!(SUB, 5, 0x2B, 0x29);
alu!(XOR, 6, 0x33, 0x31);
alu!(CMP, 7, 0x3B, 0x39);

const MOV: &[CodeDef] = &[
    CodeDef::new(Gpr, Imm, 4, &[0xB8], PlusReg).imm(4),
    CodeDef::new(RmGpr, Imm, 4, &[0xC7], Digit(0)).imm(4),
    CodeDef::new(RmGpr, Imm, 2, &[0x66, 0xC7], Digit(0)).imm(2),
    CodeDef::new(RmGpr, Imm, 1, &[0xC6], Digit(0)).imm(1),
    CodeDef::new(Gpr, RmGpr, 4, &[0x8B], RegDest),
    CodeDef::new(RmGpr, Gpr, 4, &[0x89], RegSrc),
    CodeDef::new(Gpr, RmGpr, 2, &[0x66, 0x8B], RegDest),
    CodeDef::new(RmGpr, Gpr, 2, &[0x66, 0x89], RegSrc),
    CodeDef::new(Gpr, RmGpr, 1, &[0x8A], RegDest),
    CodeDef::new(RmGpr, Gpr, 1, &[0x88], RegSrc),
];

const MOVZX: &[CodeDef] = &[
    CodeDef::new(Gpr, RmGpr, 1, &[0x0F, 0xB6], RegDest),
    CodeDef::new(Gpr, RmGpr, 2, &[0x0F, 0xB7], RegDest),
];

const MOVSX: &[CodeDef] = &[
    CodeDef::new(Gpr, RmGpr, 1, &[0x0F, 0xBE], RegDest),
    CodeDef::new(Gpr, RmGpr, 2, &[0x0F, 0xBF], RegDest),
];

const TEST: &[CodeDef] = &[
    CodeDef::new(RmGpr, Imm, 4, &[0xF7], Digit(0)).imm(4),
    CodeDef::new(RmGpr, Gpr, 4, &[0x85], RegSrc),
    CodeDef::new(RmGpr, Imm, 1, &[0xF6], Digit(0)).imm(1),
    CodeDef::new(RmGpr, Gpr, 1, &[0x84], RegSrc),
];

const NOT: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 4, &[0xF7], Digit(2))];
const NEG: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 4, &[0xF7], Digit(3))];
const MUL: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 4, &[0xF7], Digit(4))];
const DIV: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 4, &[0xF7], Digit(6))];
const IDIV: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 4, &[0xF7], Digit(7))];

macro_rules! shift {
    ($name:ident, $digit:expr) => {
        const $name: &[CodeDef] = &[
            CodeDef::new(RmGpr, Cl, 4, &[0xD3], Digit($digit)),
            CodeDef::new(RmGpr, Imm, 4, &[0xC1], Digit($digit)).imm(1),
        ];
    };
}

shift!(SHL, 4);
shift!(SHR, 5);
shift!(SAR, 7);

// Count in CL
const SHLD: &[CodeDef] = &[CodeDef::new(RmGpr, Gpr, 4, &[0x0F, 0xA5], RegSrc)];
const SHRD: &[CodeDef] = &[CodeDef::new(RmGpr, Gpr, 4, &[0x0F, 0xAD], RegSrc)];

const PUSH: &[CodeDef] = &[
    CodeDef::new(Gpr, NONE, 4, &[0x50], PlusReg),
    CodeDef::new(Imm, NONE, 0, &[0x68], Fixed).imm(4),
    CodeDef::new(Mem, NONE, 4, &[0xFF], Digit(6)),
];

const POP: &[CodeDef] = &[
    CodeDef::new(Gpr, NONE, 4, &[0x58], PlusReg),
    CodeDef::new(Mem, NONE, 4, &[0x8F], Digit(0)),
];

const JMP: &[CodeDef] = &[CodeDef::new(Label, NONE, 0, &[0xE9], Rel32)];
const JCC: &[CodeDef] = &[CodeDef::new(Label, NONE, 0, &[0x0F, 0x80], Rel32).cc()];
const SETCC: &[CodeDef] = &[CodeDef::new(RmGpr, NONE, 1, &[0x0F, 0x90], Digit(0)).cc()];
const CALL: &[CodeDef] = &[CodeDef::new(Symbol, NONE, 0, &[0xE8], Call)];

const fn fixed(opcode: &'static [u8]) -> CodeDef {
    CodeDef::new(NONE, NONE, 0, opcode, Fixed)
}

const RET: &[CodeDef] = &[fixed(&[0xC3])];
const CDQ: &[CodeDef] = &[fixed(&[0x99])];
const REP_STOSD: &[CodeDef] = &[fixed(&[0xF3, 0xAB])];
const NOP: &[CodeDef] = &[fixed(&[0x90])];
const CLI: &[CodeDef] = &[fixed(&[0xFA])];
const STI: &[CodeDef] = &[fixed(&[0xFB])];
const HLT: &[CodeDef] = &[fixed(&[0xF4])];
const INT3: &[CodeDef] = &[fixed(&[0xCC])];
// ECX selects the register; the value lands in EDX:EAX
const RDMSR: &[CodeDef] = &[fixed(&[0x0F, 0x32])];
const IRETD: &[CodeDef] = &[fixed(&[0xCF])];

const IN: &[CodeDef] = &[
    CodeDef::new(Acc, Dx, 1, &[0xEC], Fixed),
    CodeDef::new(Acc, Dx, 2, &[0x66, 0xED], Fixed),
    CodeDef::new(Acc, Dx, 4, &[0xED], Fixed),
];

const OUT: &[CodeDef] = &[
    CodeDef::new(Dx, Acc, 1, &[0xEE], Fixed),
    CodeDef::new(Dx, Acc, 2, &[0x66, 0xEF], Fixed),
    CodeDef::new(Dx, Acc, 4, &[0xEF], Fixed),
];

// ===== SSE scalar =====

macro_rules! sse {
    ($name:ident, $($byte:expr),+) => {
        const $name: &[CodeDef] = &[CodeDef::new(Xmm, RmXmm, 0, &[$($byte),+], RegDest)];
    };
}

const MOVSS: &[CodeDef] = &[
    CodeDef::new(Xmm, RmXmm, 0, &[0xF3, 0x0F, 0x10], RegDest),
    CodeDef::new(Mem, Xmm, 0, &[0xF3, 0x0F, 0x11], RegSrc),
];

const MOVSD: &[CodeDef] = &[
    CodeDef::new(Xmm, RmXmm, 0, &[0xF2, 0x0F, 0x10], RegDest),
    CodeDef::new(Mem, Xmm, 0, &[0xF2, 0x0F, 0x11], RegSrc),
];

sse!(ADDSS, 0xF3, 0x0F, 0x58);
sse!(ADDSD, 0xF2, 0x0F, 0x58);
sse!(SUBSS, 0xF3, 0x0F, 0x5C);
sse!(SUBSD, 0xF2, 0x0F, 0x5C);
sse!(MULSS, 0xF3, 0x0F, 0x59);
sse!(MULSD, 0xF2, 0x0F, 0x59);
sse!(DIVSS, 0xF3, 0x0F, 0x5E);
sse!(DIVSD, 0xF2, 0x0F, 0x5E);
sse!(UCOMISS, 0x0F, 0x2E);
sse!(UCOMISD, 0x66, 0x0F, 0x2E);
sse!(COMISS, 0x0F, 0x2F);
sse!(COMISD, 0x66, 0x0F, 0x2F);
sse!(CVTSS2SD, 0xF3, 0x0F, 0x5A);
sse!(CVTSD2SS, 0xF2, 0x0F, 0x5A);

const CVTSI2SS: &[CodeDef] = &[CodeDef::new(Xmm, RmGpr, 0, &[0xF3, 0x0F, 0x2A], RegDest)];
const CVTSI2SD: &[CodeDef] = &[CodeDef::new(Xmm, RmGpr, 0, &[0xF2, 0x0F, 0x2A], RegDest)];
const CVTTSS2SI: &[CodeDef] = &[CodeDef::new(Gpr, RmXmm, 0, &[0xF3, 0x0F, 0x2C], RegDest)];
const CVTTSD2SI: &[CodeDef] = &[CodeDef::new(Gpr, RmXmm, 0, &[0xF2, 0x0F, 0x2C], RegDest)];

/// Encodings of `op`, most specific first
pub fn table(op: X86Op) -> &'static [CodeDef] {
    use X86Op as X;
    match op {
        X::Label => &[],
        X::Mov => MOV,
        X::Movsx => MOVSX,
        X::Movzx => MOVZX,
        X::Add => ADD,
        X::Adc => ADC,
        X::Sub => SUB,
        X::Sbb => SBB,
        X::And => AND,
        X::Or => OR,
        X::Xor => XOR,
        X::Not => NOT,
        X::Neg => NEG,
        X::Cmp => CMP,
        X::Test => TEST,
        X::Mul => MUL,
        X::Div => DIV,
        X::IDiv => IDIV,
        X::Cdq => CDQ,
        X::Shl => SHL,
        X::Shr => SHR,
        X::Sar => SAR,
        X::Shld => SHLD,
        X::Shrd => SHRD,
        X::Jmp => JMP,
        X::Jcc => JCC,
        X::Setcc => SETCC,
        X::Call => CALL,
        X::Ret => RET,
        X::Push => PUSH,
        X::Pop => POP,
        X::RepStosd => REP_STOSD,
        X::Movss => MOVSS,
        X::Movsd => MOVSD,
        X::Addss => ADDSS,
        X::Addsd => ADDSD,
        X::Subss => SUBSS,
        X::Subsd => SUBSD,
        X::Mulss => MULSS,
        X::Mulsd => MULSD,
        X::Divss => DIVSS,
        X::Divsd => DIVSD,
        X::Ucomiss => UCOMISS,
        X::Ucomisd => UCOMISD,
        X::Comiss => COMISS,
        X::Comisd => COMISD,
        X::Cvtsi2ss => CVTSI2SS,
        X::Cvtsi2sd => CVTSI2SD,
        X::Cvttss2si => CVTTSS2SI,
        X::Cvttsd2si => CVTTSD2SI,
        X::Cvtss2sd => CVTSS2SD,
        X::Cvtsd2ss => CVTSD2SS,
        X::Cli => CLI,
        X::Sti => STI,
        X::Hlt => HLT,
        X::Int3 => INT3,
        X::Nop => NOP,
        X::In => IN,
        X::Out => OUT,
        X::Rdmsr => RDMSR,
        X::Iretd => IRETD,
    }
}

/// First matching encoding of `op`
pub fn select(op: X86Op, dest: Option<&Operand>, src: Option<&Operand>, width: u8) -> Option<&'static CodeDef> {
    table(op).iter().find(|def| def.matches(dest, src, width))
}
