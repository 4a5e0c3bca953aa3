//! Machine instruction builders
//!
//! Two-operand forms keep the destination in `results` and the source in
//! `operands`; forms that only read (`cmp`, `push`, `mul`) keep everything in
//! `operands`. The emitter reads them back in the same order.

use crate::ir::{ConditionCode, Instruction, LabelId, Operand, OperandKind, Register, ValueType, X86Op};

// ===== Operands =====

pub fn reg(register: Register, ty: ValueType) -> Operand {
    Operand::register(register, ty)
}

pub fn eax() -> Operand {
    reg(Register::EAX, ValueType::U4)
}

pub fn ecx() -> Operand {
    reg(Register::ECX, ValueType::U4)
}

pub fn edx() -> Operand {
    reg(Register::EDX, ValueType::U4)
}

pub fn esp() -> Operand {
    reg(Register::ESP, ValueType::U4)
}

pub fn xmm0(ty: ValueType) -> Operand {
    reg(Register::XMM0, ty)
}

pub fn xmm1(ty: ValueType) -> Operand {
    reg(Register::XMM1, ty)
}

/// 32-bit immediate
pub fn imm(value: i64) -> Operand {
    Operand::constant(value, ValueType::U4)
}

/// Place a float constant in the literal pool; other operands pass through
pub fn literal(operand: &Operand) -> Operand {
    match operand.kind {
        OperandKind::Constant(bits) => Operand::new(OperandKind::Literal(bits), operand.ty),
        _ => operand.clone(),
    }
}

/// `[esp + displacement]`
pub fn stack_top(displacement: i32, ty: ValueType) -> Operand {
    Operand::memory(Register::ESP, displacement, ty)
}

// ===== Instructions =====

pub fn op(op: X86Op, dest: Operand, src: Operand) -> Instruction {
    Instruction::x86(op, vec![dest], vec![src])
}

pub fn mov(dest: Operand, src: Operand) -> Instruction {
    op(X86Op::Mov, dest, src)
}

/// `not`, `neg`, `pop`
pub fn unary(op: X86Op, dest: Operand) -> Instruction {
    Instruction::x86(op, vec![dest], vec![])
}

/// `push`, `mul`, `div`, `idiv`
pub fn source(op: X86Op, src: Operand) -> Instruction {
    Instruction::x86(op, vec![], vec![src])
}

/// `cmp`, `test`, `comis*`, `ucomis*`
pub fn compare(op: X86Op, left: Operand, right: Operand) -> Instruction {
    Instruction::x86(op, vec![], vec![left, right])
}

pub fn plain(op: X86Op) -> Instruction {
    Instruction::x86(op, vec![], vec![])
}

pub fn push(src: Operand) -> Instruction {
    source(X86Op::Push, src)
}

pub fn pop(dest: Operand) -> Instruction {
    unary(X86Op::Pop, dest)
}

pub fn jmp(target: LabelId) -> Instruction {
    plain(X86Op::Jmp).with_target(target)
}

pub fn jcc(condition: ConditionCode, target: LabelId) -> Instruction {
    plain(X86Op::Jcc).with_condition(condition).with_target(target)
}

/// `setcc` into the low byte of `register`
pub fn setcc(condition: ConditionCode, register: Register) -> Instruction {
    unary(X86Op::Setcc, reg(register, ValueType::U1)).with_condition(condition)
}

/// Define `target` here
pub fn label(target: LabelId) -> Instruction {
    plain(X86Op::Label).with_target(target)
}

pub fn call(symbol: impl Into<String>) -> Instruction {
    let symbol = symbol.into();
    source(X86Op::Call, Operand::symbol(symbol.clone())).with_call_target(symbol)
}
