//! Instruction opcodes
//!
//! One instruction list holds both levels of the compiler: platform-neutral
//! [`IrOp`]s produced by decoding and [`X86Op`]s produced by lowering. Block
//! markers and `Nop` exist at both levels.

use std::fmt;

/// Platform-neutral operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrOp {
    // ===== Data movement =====
    Move,
    /// `result = *(access*)operands[0]`
    Load,
    /// `*(access*)operands[0] = operands[1]`
    Store,

    // ===== Integer arithmetic =====
    Add,
    Sub,
    Mul,
    DivSigned,
    DivUnsigned,
    RemSigned,
    RemUnsigned,
    Neg,

    // ===== Bitwise =====
    And,
    Or,
    Xor,
    Not,
    ShiftLeft,
    ShiftRightSigned,
    ShiftRightUnsigned,

    // ===== Float arithmetic =====
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    FloatRem,
    FloatNeg,

    // ===== Compares =====
    IntegerCompare,
    FloatCompare,
    IntegerCompareBranch,
    FloatCompareBranch,

    // ===== Conversions =====
    SignExtend,
    ZeroExtend,
    Truncate,
    IntToFloat,
    UIntToFloat,
    FloatToInt,
    FloatConvert,

    // ===== Control =====
    Jmp,
    Return,
    Call,
    Break,
    Intrinsic(Intrinsic),

    /// SSA merge; only present between enter-ssa and leave-ssa
    Phi,
}

impl IrOp {
    pub fn name(self) -> &'static str {
        use IrOp::*;
        match self {
            Move => "move",
            Load => "load",
            Store => "store",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            DivSigned => "div.s",
            DivUnsigned => "div.u",
            RemSigned => "rem.s",
            RemUnsigned => "rem.u",
            Neg => "neg",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            ShiftLeft => "shl",
            ShiftRightSigned => "sar",
            ShiftRightUnsigned => "shr",
            FloatAdd => "fadd",
            FloatSub => "fsub",
            FloatMul => "fmul",
            FloatDiv => "fdiv",
            FloatRem => "frem",
            FloatNeg => "fneg",
            IntegerCompare => "icmp",
            FloatCompare => "fcmp",
            IntegerCompareBranch => "icmp.br",
            FloatCompareBranch => "fcmp.br",
            SignExtend => "sext",
            ZeroExtend => "zext",
            Truncate => "trunc",
            IntToFloat => "itof",
            UIntToFloat => "utof",
            FloatToInt => "ftoi",
            FloatConvert => "fconv",
            Jmp => "jmp",
            Return => "return",
            Call => "call",
            Break => "break",
            Intrinsic(intrinsic) => intrinsic.name(),
            Phi => "phi",
        }
    }

    /// Ends a block: control never falls through to the next instruction
    pub fn is_unconditional_exit(self) -> bool {
        matches!(self, IrOp::Jmp | IrOp::Return)
    }

    pub fn is_conditional_branch(self) -> bool {
        matches!(self, IrOp::IntegerCompareBranch | IrOp::FloatCompareBranch)
    }

    /// Commutative integer operation
    pub fn is_commutative(self) -> bool {
        matches!(self, IrOp::Add | IrOp::Mul | IrOp::And | IrOp::Or | IrOp::Xor)
    }
}

/// Privileged or port-I/O operation reached through a reserved call symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Cli,
    Sti,
    Hlt,
    Int3,
    In8,
    In16,
    In32,
    Out8,
    Out16,
    Out32,
    /// Read the model-specific register selected by the argument
    Rdmsr,
    Iretd,
}

impl Intrinsic {
    /// Namespace reserved for intrinsic call targets
    pub const PREFIX: &'static str = "kiln.native.";

    const ALL: [Intrinsic; 12] = [
        Intrinsic::Cli,
        Intrinsic::Sti,
        Intrinsic::Hlt,
        Intrinsic::Int3,
        Intrinsic::In8,
        Intrinsic::In16,
        Intrinsic::In32,
        Intrinsic::Out8,
        Intrinsic::Out16,
        Intrinsic::Out32,
        Intrinsic::Rdmsr,
        Intrinsic::Iretd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Cli => "cli",
            Intrinsic::Sti => "sti",
            Intrinsic::Hlt => "hlt",
            Intrinsic::Int3 => "int3",
            Intrinsic::In8 => "in8",
            Intrinsic::In16 => "in16",
            Intrinsic::In32 => "in32",
            Intrinsic::Out8 => "out8",
            Intrinsic::Out16 => "out16",
            Intrinsic::Out32 => "out32",
            Intrinsic::Rdmsr => "rdmsr",
            Intrinsic::Iretd => "iretd",
        }
    }

    /// Recognize `kiln.native.<name>`
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let name = symbol.strip_prefix(Self::PREFIX)?;
        Self::ALL.into_iter().find(|i| i.name() == name)
    }

    /// Number of arguments taken
    pub fn arity(self) -> usize {
        match self {
            Intrinsic::Cli | Intrinsic::Sti | Intrinsic::Hlt | Intrinsic::Int3 | Intrinsic::Iretd => 0,
            Intrinsic::In8 | Intrinsic::In16 | Intrinsic::In32 | Intrinsic::Rdmsr => 1,
            Intrinsic::Out8 | Intrinsic::Out16 | Intrinsic::Out32 => 2,
        }
    }

    /// Width of the port transfer in bytes
    pub fn port_width(self) -> Option<u8> {
        match self {
            Intrinsic::In8 | Intrinsic::Out8 => Some(1),
            Intrinsic::In16 | Intrinsic::Out16 => Some(2),
            Intrinsic::In32 | Intrinsic::Out32 => Some(4),
            _ => None,
        }
    }

    pub fn has_result(self) -> bool {
        matches!(self, Intrinsic::In8 | Intrinsic::In16 | Intrinsic::In32 | Intrinsic::Rdmsr)
    }

    /// Width in bytes the result must have, when it is fixed
    pub fn result_width(self) -> Option<u8> {
        match self {
            Intrinsic::Rdmsr => Some(8),
            _ => None,
        }
    }
}

/// x86 machine instruction mnemonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86Op {
    /// Defines `target` at the current position; encodes no bytes
    Label,

    Mov,
    Movsx,
    Movzx,
    Add,
    Adc,
    Sub,
    Sbb,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Cmp,
    Test,
    Mul,
    Div,
    IDiv,
    Cdq,
    Shl,
    Shr,
    Sar,
    Shld,
    Shrd,

    Jmp,
    Jcc,
    Setcc,
    Call,
    Ret,
    Push,
    Pop,
    RepStosd,

    Movss,
    Movsd,
    Addss,
    Addsd,
    Subss,
    Subsd,
    Mulss,
    Mulsd,
    Divss,
    Divsd,
    Ucomiss,
    Ucomisd,
    Comiss,
    Comisd,
    Cvtsi2ss,
    Cvtsi2sd,
    Cvttss2si,
    Cvttsd2si,
    Cvtss2sd,
    Cvtsd2ss,

    Cli,
    Sti,
    Hlt,
    Int3,
    Nop,
    In,
    Out,
    Rdmsr,
    Iretd,
}

impl X86Op {
    pub fn mnemonic(self) -> &'static str {
        use X86Op::*;
        match self {
            Label => "label",
            Mov => "mov",
            Movsx => "movsx",
            Movzx => "movzx",
            Add => "add",
            Adc => "adc",
            Sub => "sub",
            Sbb => "sbb",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Neg => "neg",
            Cmp => "cmp",
            Test => "test",
            Mul => "mul",
            Div => "div",
            IDiv => "idiv",
            Cdq => "cdq",
            Shl => "shl",
            Shr => "shr",
            Sar => "sar",
            Shld => "shld",
            Shrd => "shrd",
            Jmp => "jmp",
            Jcc => "jcc",
            Setcc => "setcc",
            Call => "call",
            Ret => "ret",
            Push => "push",
            Pop => "pop",
            RepStosd => "rep stosd",
            Movss => "movss",
            Movsd => "movsd",
            Addss => "addss",
            Addsd => "addsd",
            Subss => "subss",
            Subsd => "subsd",
            Mulss => "mulss",
            Mulsd => "mulsd",
            Divss => "divss",
            Divsd => "divsd",
            Ucomiss => "ucomiss",
            Ucomisd => "ucomisd",
            Comiss => "comiss",
            Comisd => "comisd",
            Cvtsi2ss => "cvtsi2ss",
            Cvtsi2sd => "cvtsi2sd",
            Cvttss2si => "cvttss2si",
            Cvttsd2si => "cvttsd2si",
            Cvtss2sd => "cvtss2sd",
            Cvtsd2ss => "cvtsd2ss",
            Cli => "cli",
            Sti => "sti",
            Hlt => "hlt",
            Int3 => "int3",
            Nop => "nop",
            In => "in",
            Out => "out",
            Rdmsr => "rdmsr",
            Iretd => "iretd",
        }
    }
}

/// Opcode of an [`Instruction`](super::Instruction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Placeholder that encodes nothing
    Nop,
    /// First instruction of a block
    BlockStart,
    /// Last instruction of a block
    BlockEnd,
    Ir(IrOp),
    X86(X86Op),
}

impl Opcode {
    pub fn is_marker(self) -> bool {
        matches!(self, Opcode::BlockStart | Opcode::BlockEnd)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::BlockStart => "block.start",
            Opcode::BlockEnd => "block.end",
            Opcode::Ir(op) => op.name(),
            Opcode::X86(op) => op.mnemonic(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
