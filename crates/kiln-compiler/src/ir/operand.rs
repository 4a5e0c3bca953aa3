//! IR operands
//!
//! An [`Operand`] pairs an [`OperandKind`] with the [`ValueType`] it is
//! accessed at. Operands compare structurally. Stack slots additionally have a
//! [`SlotKey`] (the frame offset alone) so SSA versions of one slot can be
//! matched to each other.

use super::register::Register;
use super::types::ValueType;
use std::fmt;

/// Branch target or block label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl LabelId {
    /// Label of the synthetic entry block
    pub const PROLOGUE: LabelId = LabelId(u32::MAX - 1);
    /// Label of the shared exit block
    pub const EPILOGUE: LabelId = LabelId(u32::MAX);
    /// First label handed out for code created after decoding
    pub const FIRST_TEMPORARY: u32 = 0x8000_0000;

    /// Label of the block starting at a bytecode offset
    pub fn at_offset(offset: usize) -> Self {
        LabelId(offset as u32)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LabelId::PROLOGUE => f.write_str("prologue"),
            LabelId::EPILOGUE => f.write_str("epilogue"),
            LabelId(n) if n >= LabelId::FIRST_TEMPORARY => write!(f, ".T{}", n - LabelId::FIRST_TEMPORARY),
            LabelId(n) => write!(f, ".L{:04X}", n),
        }
    }
}

/// What a stack slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOrigin {
    /// Incoming argument
    Param(u16),
    /// Declared local variable
    Local(u16),
    /// Compiler temporary
    Temp(u32),
}

/// A frame slot addressed relative to EBP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlot {
    /// Displacement from EBP
    pub offset: i32,
    /// SSA version; 0 outside SSA form
    pub version: u32,
    pub origin: SlotOrigin,
}

/// Identity of a slot independent of its SSA version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(pub i32);

/// Memory reference `[base + index*scale + displacement]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRef {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub displacement: i32,
}

/// Operand shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Physical register
    Register(Register),
    /// Explicit memory reference
    Memory(MemoryRef),
    /// Immediate; holds the raw bits (floats as their IEEE pattern)
    Constant(u64),
    /// Constant placed in the method's literal pool
    Literal(u64),
    /// Frame slot
    Stack(StackSlot),
    /// Code label
    Label(LabelId),
    /// Linker symbol
    Symbol(String),
}

/// A typed operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    pub kind: OperandKind,
    pub ty: ValueType,
}

impl Operand {
    pub fn new(kind: OperandKind, ty: ValueType) -> Self {
        Operand { kind, ty }
    }

    // ===== Constructors =====

    pub fn register(register: Register, ty: ValueType) -> Self {
        Self::new(OperandKind::Register(register), ty)
    }

    /// `[base + displacement]`
    pub fn memory(base: Register, displacement: i32, ty: ValueType) -> Self {
        Self::new(
            OperandKind::Memory(MemoryRef {
                base: Some(base),
                index: None,
                scale: 1,
                displacement,
            }),
            ty,
        )
    }

    /// Integer constant, truncated to the width of `ty`
    pub fn constant(value: i64, ty: ValueType) -> Self {
        let bits = match ty.width {
            1 => value as u8 as u64,
            2 => value as u16 as u64,
            4 => value as u32 as u64,
            _ => value as u64,
        };
        Self::new(OperandKind::Constant(bits), ty)
    }

    pub fn i32(value: i32) -> Self {
        Self::constant(i64::from(value), ValueType::I4)
    }

    pub fn f32(value: f32) -> Self {
        Self::new(OperandKind::Constant(u64::from(value.to_bits())), ValueType::R4)
    }

    pub fn f64(value: f64) -> Self {
        Self::new(OperandKind::Constant(value.to_bits()), ValueType::R8)
    }

    pub fn stack(slot: StackSlot, ty: ValueType) -> Self {
        Self::new(OperandKind::Stack(slot), ty)
    }

    pub fn label(label: LabelId) -> Self {
        Self::new(OperandKind::Label(label), ValueType::PTR)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self::new(OperandKind::Symbol(name.into()), ValueType::PTR)
    }

    // ===== Queries =====

    pub fn is_register(&self) -> bool {
        matches!(self.kind, OperandKind::Register(_))
    }

    /// Stack slots, memory references and literals all encode as memory
    pub fn is_memory(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::Memory(_) | OperandKind::Stack(_) | OperandKind::Literal(_)
        )
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OperandKind::Constant(_))
    }

    pub fn as_register(&self) -> Option<Register> {
        match self.kind {
            OperandKind::Register(r) => Some(r),
            _ => None,
        }
    }

    pub fn stack_slot(&self) -> Option<&StackSlot> {
        match &self.kind {
            OperandKind::Stack(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn stack_slot_mut(&mut self) -> Option<&mut StackSlot> {
        match &mut self.kind {
            OperandKind::Stack(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn slot_key(&self) -> Option<SlotKey> {
        self.stack_slot().map(|slot| SlotKey(slot.offset))
    }

    /// Raw bits of a constant
    pub fn bits(&self) -> Option<u64> {
        match self.kind {
            OperandKind::Constant(bits) => Some(bits),
            _ => None,
        }
    }

    /// Integer value of a constant, sign- or zero-extended per its type
    pub fn constant_value(&self) -> Option<i64> {
        let bits = self.bits()?;
        Some(match (self.ty.width, self.ty.signed) {
            (1, true) => i64::from(bits as u8 as i8),
            (1, false) => i64::from(bits as u8),
            (2, true) => i64::from(bits as u16 as i16),
            (2, false) => i64::from(bits as u16),
            (4, true) => i64::from(bits as u32 as i32),
            (4, false) => i64::from(bits as u32),
            _ => bits as i64,
        })
    }

    /// Same operand accessed at another type
    pub fn with_type(&self, ty: ValueType) -> Self {
        match self.kind {
            OperandKind::Constant(_) if ty.is_int() => {
                let value = self.constant_value().unwrap_or_default();
                Operand::constant(value, ty)
            }
            _ => Operand::new(self.kind.clone(), ty),
        }
    }

    /// Same slot at another SSA version; other operands are returned unchanged
    pub fn with_version(&self, version: u32) -> Self {
        let mut operand = self.clone();
        if let Some(slot) = operand.stack_slot_mut() {
            slot.version = version;
        }
        operand
    }

    /// SSA version of a stack slot
    pub fn version(&self) -> Option<u32> {
        self.stack_slot().map(|slot| slot.version)
    }

    // ===== Eight-byte halves =====

    /// Low four bytes of an eight-byte value
    pub fn low(&self) -> Operand {
        self.half(0)
    }

    /// High four bytes of an eight-byte value
    pub fn high(&self) -> Operand {
        self.half(1)
    }

    fn half(&self, which: u32) -> Operand {
        let ty = ValueType::U4;
        match &self.kind {
            OperandKind::Constant(bits) => {
                let value = (bits >> (32 * which)) as u32;
                Operand::new(OperandKind::Constant(u64::from(value)), ty)
            }
            OperandKind::Stack(slot) => {
                let mut slot = *slot;
                slot.offset += 4 * which as i32;
                Operand::stack(slot, ty)
            }
            OperandKind::Memory(mem) => {
                let mut mem = *mem;
                mem.displacement += 4 * which as i32;
                Operand::new(OperandKind::Memory(mem), ty)
            }
            other => Operand::new(other.clone(), ty),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::Register(r) => f.write_str(r.name_for(self.ty)),
            OperandKind::Memory(mem) => {
                write!(f, "{} [", self.ty)?;
                let mut first = true;
                if let Some(base) = mem.base {
                    write!(f, "{}", base)?;
                    first = false;
                }
                if let Some(index) = mem.index {
                    if !first {
                        f.write_str("+")?;
                    }
                    write!(f, "{}*{}", index, mem.scale)?;
                    first = false;
                }
                if first {
                    write!(f, "{:#x}", mem.displacement)?;
                } else if mem.displacement != 0 {
                    write!(f, "{:+}", mem.displacement)?;
                }
                f.write_str("]")
            }
            OperandKind::Constant(_) if self.ty.is_float() => {
                let bits = self.bits().unwrap_or_default();
                if self.ty.width == 4 {
                    write!(f, "{}", f32::from_bits(bits as u32))
                } else {
                    write!(f, "{}", f64::from_bits(bits))
                }
            }
            OperandKind::Constant(_) => write!(f, "{}", self.constant_value().unwrap_or_default()),
            OperandKind::Literal(bits) => write!(f, "{} literal({:#x})", self.ty, bits),
            OperandKind::Stack(slot) => {
                write!(f, "{} [ebp{:+}]", self.ty, slot.offset)?;
                if slot.version != 0 {
                    write!(f, "<{}>", slot.version)?;
                }
                Ok(())
            }
            OperandKind::Label(label) => write!(f, "{}", label),
            OperandKind::Symbol(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(offset: i32, version: u32) -> Operand {
        Operand::stack(
            StackSlot {
                offset,
                version,
                origin: SlotOrigin::Temp(0),
            },
            ValueType::I4,
        )
    }

    #[test]
    fn test_structural_equality_and_keys() {
        assert_eq!(slot(-8, 1), slot(-8, 1));
        assert_ne!(slot(-8, 1), slot(-8, 2));
        assert_eq!(slot(-8, 1).slot_key(), slot(-8, 2).slot_key());
        assert_ne!(slot(-8, 1).slot_key(), slot(-12, 1).slot_key());
        assert_eq!(Operand::i32(5).slot_key(), None);
    }

    #[test]
    fn test_constant_truncation_and_extension() {
        let c = Operand::constant(-1, ValueType::I1);
        assert_eq!(c.bits(), Some(0xFF));
        assert_eq!(c.constant_value(), Some(-1));
        assert_eq!(c.with_type(ValueType::U1).constant_value(), Some(255));
        assert_eq!(Operand::constant(-1, ValueType::U4).constant_value(), Some(0xFFFF_FFFF));
    }

    #[test]
    fn test_halves() {
        let c = Operand::constant(0x1234_5678_9ABC_DEF0, ValueType::I8);
        assert_eq!(c.low().bits(), Some(0x9ABC_DEF0));
        assert_eq!(c.high().bits(), Some(0x1234_5678));

        let s = slot(-16, 3).with_type(ValueType::I8);
        assert_eq!(s.high().stack_slot().map(|s| s.offset), Some(-12));
        assert_eq!(s.low().stack_slot().map(|s| s.offset), Some(-16));

        let m = Operand::memory(Register::EDX, 0, ValueType::U8);
        assert_eq!(m.high(), Operand::memory(Register::EDX, 4, ValueType::U4));
    }

    #[test]
    fn test_display() {
        assert_eq!(slot(-8, 2).to_string(), "i4 [ebp-8]<2>");
        assert_eq!(Operand::register(Register::EAX, ValueType::U1).to_string(), "al");
        assert_eq!(Operand::label(LabelId(0x10)).to_string(), ".L0010");
        assert_eq!(Operand::label(LabelId::EPILOGUE).to_string(), "epilogue");
    }
}
