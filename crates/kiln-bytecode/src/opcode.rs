//! Bytecode opcodes
//!
//! The input encoding is CIL-shaped: most opcodes occupy one byte, and the
//! comparison and long-index variable opcodes use the `0xFE` prefix. Two-byte
//! opcodes are tagged as `0xFE00 | second_byte` so every opcode fits a `u16`.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x26: Stack manipulation, arguments, locals & constants
//! - 0x28-0x44: Calls, returns and branches
//! - 0x46-0x57: Indirect loads and stores
//! - 0x58-0x6E, 0x76, 0xD1-0xE0: Arithmetic and conversions
//! - 0xFE01-0xFE0E: Comparisons and long-index variable access

/// Prefix byte introducing a two-byte opcode
pub const EXTENDED_PREFIX: u8 = 0xFE;

/// Shape of the immediate that follows an opcode in the bytecode stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// No immediate
    None,
    /// Signed 8-bit integer, sign-extended to 32 bits
    Int8,
    /// Unsigned 8-bit argument or local index
    ShortIndex,
    /// Unsigned 16-bit argument or local index
    Index,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// IEEE single
    Float32,
    /// IEEE double
    Float64,
    /// 32-bit metadata token
    Token,
    /// Signed 8-bit branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
}

impl OperandKind {
    /// Size of the immediate in bytes
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Int8 | OperandKind::ShortIndex | OperandKind::ShortBranch => 1,
            OperandKind::Index => 2,
            OperandKind::Int32 | OperandKind::Float32 | OperandKind::Token | OperandKind::Branch => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
        }
    }
}

/// How control leaves an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowControl {
    /// Falls through to the next instruction
    Next,
    /// Unconditional branch
    Branch,
    /// Conditional branch; falls through when not taken
    CondBranch,
    /// Method call; falls through on return
    Call,
    /// Method return
    Return,
    /// Debugger break; falls through
    Break,
}

/// Evaluation stack effect declared by an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Pops and pushes a fixed number of values
    Fixed {
        /// Values consumed
        pops: u8,
        /// Values produced
        pushes: u8,
    },
    /// Depends on a signature (`call` on its target, `ret` on the method)
    Variable,
}

macro_rules! define_opcodes {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal, $name:literal, $operand:ident; )*) => {
        /// Bytecode opcode enumeration
        #[repr(u16)]
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $( $(#[$doc])* $variant = $code, )*
        }

        impl Opcode {
            /// Every defined opcode, in encoding order
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$variant, )* ];

            /// Convert a tagged code to an opcode
            ///
            /// Returns None if the code does not correspond to a valid opcode.
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Get the assembler mnemonic of the opcode
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                }
            }

            /// Shape of the immediate following this opcode
            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $( Self::$variant => OperandKind::$operand, )*
                }
            }
        }
    };
}

define_opcodes! {
    /// No operation
    Nop = 0x00, "nop", None;
    /// Debugger breakpoint
    Break = 0x01, "break", None;
    /// Load argument 0
    Ldarg_0 = 0x02, "ldarg.0", None;
    /// Load argument 1
    Ldarg_1 = 0x03, "ldarg.1", None;
    /// Load argument 2
    Ldarg_2 = 0x04, "ldarg.2", None;
    /// Load argument 3
    Ldarg_3 = 0x05, "ldarg.3", None;
    /// Load local 0
    Ldloc_0 = 0x06, "ldloc.0", None;
    /// Load local 1
    Ldloc_1 = 0x07, "ldloc.1", None;
    /// Load local 2
    Ldloc_2 = 0x08, "ldloc.2", None;
    /// Load local 3
    Ldloc_3 = 0x09, "ldloc.3", None;
    /// Store local 0
    Stloc_0 = 0x0A, "stloc.0", None;
    /// Store local 1
    Stloc_1 = 0x0B, "stloc.1", None;
    /// Store local 2
    Stloc_2 = 0x0C, "stloc.2", None;
    /// Store local 3
    Stloc_3 = 0x0D, "stloc.3", None;
    /// Load argument (operand: u8 index)
    Ldarg_S = 0x0E, "ldarg.s", ShortIndex;
    /// Store argument (operand: u8 index)
    Starg_S = 0x10, "starg.s", ShortIndex;
    /// Load local (operand: u8 index)
    Ldloc_S = 0x11, "ldloc.s", ShortIndex;
    /// Store local (operand: u8 index)
    Stloc_S = 0x13, "stloc.s", ShortIndex;
    /// Push a null pointer
    Ldnull = 0x14, "ldnull", None;
    /// Push -1 as int32
    Ldc_I4_M1 = 0x15, "ldc.i4.m1", None;
    /// Push 0 as int32
    Ldc_I4_0 = 0x16, "ldc.i4.0", None;
    /// Push 1 as int32
    Ldc_I4_1 = 0x17, "ldc.i4.1", None;
    /// Push 2 as int32
    Ldc_I4_2 = 0x18, "ldc.i4.2", None;
    /// Push 3 as int32
    Ldc_I4_3 = 0x19, "ldc.i4.3", None;
    /// Push 4 as int32
    Ldc_I4_4 = 0x1A, "ldc.i4.4", None;
    /// Push 5 as int32
    Ldc_I4_5 = 0x1B, "ldc.i4.5", None;
    /// Push 6 as int32
    Ldc_I4_6 = 0x1C, "ldc.i4.6", None;
    /// Push 7 as int32
    Ldc_I4_7 = 0x1D, "ldc.i4.7", None;
    /// Push 8 as int32
    Ldc_I4_8 = 0x1E, "ldc.i4.8", None;
    /// Push int32 (operand: i8)
    Ldc_I4_S = 0x1F, "ldc.i4.s", Int8;
    /// Push int32 (operand: i32)
    Ldc_I4 = 0x20, "ldc.i4", Int32;
    /// Push int64 (operand: i64)
    Ldc_I8 = 0x21, "ldc.i8", Int64;
    /// Push float32 (operand: f32)
    Ldc_R4 = 0x22, "ldc.r4", Float32;
    /// Push float64 (operand: f64)
    Ldc_R8 = 0x23, "ldc.r8", Float64;
    /// Duplicate the top stack value
    Dup = 0x25, "dup", None;
    /// Discard the top stack value
    Pop = 0x26, "pop", None;
    /// Call a method (operand: token)
    Call = 0x28, "call", Token;
    /// Return from the method
    Ret = 0x2A, "ret", None;
    /// Unconditional short branch
    Br_S = 0x2B, "br.s", ShortBranch;
    /// Branch if zero (short)
    Brfalse_S = 0x2C, "brfalse.s", ShortBranch;
    /// Branch if non-zero (short)
    Brtrue_S = 0x2D, "brtrue.s", ShortBranch;
    /// Branch if equal (short)
    Beq_S = 0x2E, "beq.s", ShortBranch;
    /// Branch if greater or equal (short)
    Bge_S = 0x2F, "bge.s", ShortBranch;
    /// Branch if greater (short)
    Bgt_S = 0x30, "bgt.s", ShortBranch;
    /// Branch if less or equal (short)
    Ble_S = 0x31, "ble.s", ShortBranch;
    /// Branch if less (short)
    Blt_S = 0x32, "blt.s", ShortBranch;
    /// Branch if not equal or unordered (short)
    Bne_Un_S = 0x33, "bne.un.s", ShortBranch;
    /// Branch if greater or equal, unsigned or unordered (short)
    Bge_Un_S = 0x34, "bge.un.s", ShortBranch;
    /// Branch if greater, unsigned or unordered (short)
    Bgt_Un_S = 0x35, "bgt.un.s", ShortBranch;
    /// Branch if less or equal, unsigned or unordered (short)
    Ble_Un_S = 0x36, "ble.un.s", ShortBranch;
    /// Branch if less, unsigned or unordered (short)
    Blt_Un_S = 0x37, "blt.un.s", ShortBranch;
    /// Unconditional branch
    Br = 0x38, "br", Branch;
    /// Branch if zero
    Brfalse = 0x39, "brfalse", Branch;
    /// Branch if non-zero
    Brtrue = 0x3A, "brtrue", Branch;
    /// Branch if equal
    Beq = 0x3B, "beq", Branch;
    /// Branch if greater or equal
    Bge = 0x3C, "bge", Branch;
    /// Branch if greater
    Bgt = 0x3D, "bgt", Branch;
    /// Branch if less or equal
    Ble = 0x3E, "ble", Branch;
    /// Branch if less
    Blt = 0x3F, "blt", Branch;
    /// Branch if not equal or unordered
    Bne_Un = 0x40, "bne.un", Branch;
    /// Branch if greater or equal, unsigned or unordered
    Bge_Un = 0x41, "bge.un", Branch;
    /// Branch if greater, unsigned or unordered
    Bgt_Un = 0x42, "bgt.un", Branch;
    /// Branch if less or equal, unsigned or unordered
    Ble_Un = 0x43, "ble.un", Branch;
    /// Branch if less, unsigned or unordered
    Blt_Un = 0x44, "blt.un", Branch;
    /// Load int8 through a pointer
    Ldind_I1 = 0x46, "ldind.i1", None;
    /// Load uint8 through a pointer
    Ldind_U1 = 0x47, "ldind.u1", None;
    /// Load int16 through a pointer
    Ldind_I2 = 0x48, "ldind.i2", None;
    /// Load uint16 through a pointer
    Ldind_U2 = 0x49, "ldind.u2", None;
    /// Load int32 through a pointer
    Ldind_I4 = 0x4A, "ldind.i4", None;
    /// Load uint32 through a pointer
    Ldind_U4 = 0x4B, "ldind.u4", None;
    /// Load int64 through a pointer
    Ldind_I8 = 0x4C, "ldind.i8", None;
    /// Load native int through a pointer
    Ldind_I = 0x4D, "ldind.i", None;
    /// Load float32 through a pointer
    Ldind_R4 = 0x4E, "ldind.r4", None;
    /// Load float64 through a pointer
    Ldind_R8 = 0x4F, "ldind.r8", None;
    /// Store int8 through a pointer
    Stind_I1 = 0x52, "stind.i1", None;
    /// Store int16 through a pointer
    Stind_I2 = 0x53, "stind.i2", None;
    /// Store int32 through a pointer
    Stind_I4 = 0x54, "stind.i4", None;
    /// Store int64 through a pointer
    Stind_I8 = 0x55, "stind.i8", None;
    /// Store float32 through a pointer
    Stind_R4 = 0x56, "stind.r4", None;
    /// Store float64 through a pointer
    Stind_R8 = 0x57, "stind.r8", None;
    /// Add
    Add = 0x58, "add", None;
    /// Subtract
    Sub = 0x59, "sub", None;
    /// Multiply
    Mul = 0x5A, "mul", None;
    /// Signed divide
    Div = 0x5B, "div", None;
    /// Unsigned divide
    Div_Un = 0x5C, "div.un", None;
    /// Signed remainder
    Rem = 0x5D, "rem", None;
    /// Unsigned remainder
    Rem_Un = 0x5E, "rem.un", None;
    /// Bitwise and
    And = 0x5F, "and", None;
    /// Bitwise or
    Or = 0x60, "or", None;
    /// Bitwise xor
    Xor = 0x61, "xor", None;
    /// Shift left
    Shl = 0x62, "shl", None;
    /// Arithmetic shift right
    Shr = 0x63, "shr", None;
    /// Logical shift right
    Shr_Un = 0x64, "shr.un", None;
    /// Negate
    Neg = 0x65, "neg", None;
    /// Bitwise complement
    Not = 0x66, "not", None;
    /// Convert to int8
    Conv_I1 = 0x67, "conv.i1", None;
    /// Convert to int16
    Conv_I2 = 0x68, "conv.i2", None;
    /// Convert to int32
    Conv_I4 = 0x69, "conv.i4", None;
    /// Convert to int64
    Conv_I8 = 0x6A, "conv.i8", None;
    /// Convert to float32
    Conv_R4 = 0x6B, "conv.r4", None;
    /// Convert to float64
    Conv_R8 = 0x6C, "conv.r8", None;
    /// Convert to uint32
    Conv_U4 = 0x6D, "conv.u4", None;
    /// Convert to uint64
    Conv_U8 = 0x6E, "conv.u8", None;
    /// Convert unsigned integer to float64
    Conv_R_Un = 0x76, "conv.r.un", None;
    /// Convert to uint16
    Conv_U2 = 0xD1, "conv.u2", None;
    /// Convert to uint8
    Conv_U1 = 0xD2, "conv.u1", None;
    /// Convert to native int
    Conv_I = 0xD3, "conv.i", None;
    /// Convert to native unsigned int
    Conv_U = 0xE0, "conv.u", None;
    /// Push 1 if equal, else 0
    Ceq = 0xFE01, "ceq", None;
    /// Push 1 if greater, else 0
    Cgt = 0xFE02, "cgt", None;
    /// Push 1 if greater (unsigned or unordered), else 0
    Cgt_Un = 0xFE03, "cgt.un", None;
    /// Push 1 if less, else 0
    Clt = 0xFE04, "clt", None;
    /// Push 1 if less (unsigned or unordered), else 0
    Clt_Un = 0xFE05, "clt.un", None;
    /// Load argument (operand: u16 index)
    Ldarg = 0xFE09, "ldarg", Index;
    /// Store argument (operand: u16 index)
    Starg = 0xFE0B, "starg", Index;
    /// Load local (operand: u16 index)
    Ldloc = 0xFE0C, "ldloc", Index;
    /// Store local (operand: u16 index)
    Stloc = 0xFE0E, "stloc", Index;
}

impl Opcode {
    /// Convert opcode to its tagged code
    #[inline]
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Whether the opcode uses the `0xFE` prefix
    #[inline]
    pub fn is_extended(self) -> bool {
        self.to_u16() > 0xFF
    }

    /// Number of bytes the opcode itself occupies
    pub fn opcode_size(self) -> usize {
        if self.is_extended() {
            2
        } else {
            1
        }
    }

    /// Total encoded size including the immediate
    pub fn encoded_size(self) -> usize {
        self.opcode_size() + self.operand_kind().size()
    }

    /// Append the opcode bytes (without immediate) to a buffer
    pub fn write_to(self, buffer: &mut Vec<u8>) {
        let code = self.to_u16();
        if self.is_extended() {
            buffer.push(EXTENDED_PREFIX);
        }
        buffer.push((code & 0xFF) as u8);
    }

    /// How control leaves this opcode
    pub fn flow(self) -> FlowControl {
        use Opcode::*;
        match self {
            Br_S | Br => FlowControl::Branch,
            Brfalse_S | Brtrue_S | Beq_S | Bge_S | Bgt_S | Ble_S | Blt_S | Bne_Un_S | Bge_Un_S
            | Bgt_Un_S | Ble_Un_S | Blt_Un_S | Brfalse | Brtrue | Beq | Bge | Bgt | Ble | Blt
            | Bne_Un | Bge_Un | Bgt_Un | Ble_Un | Blt_Un => FlowControl::CondBranch,
            Call => FlowControl::Call,
            Ret => FlowControl::Return,
            Break => FlowControl::Break,
            _ => FlowControl::Next,
        }
    }

    /// Declared evaluation stack effect
    pub fn stack_effect(self) -> StackEffect {
        use Opcode::*;
        let (pops, pushes) = match self {
            Call | Ret => return StackEffect::Variable,
            Nop | Break | Br_S | Br => (0, 0),
            Ldarg_0 | Ldarg_1 | Ldarg_2 | Ldarg_3 | Ldarg_S | Ldarg | Ldloc_0 | Ldloc_1
            | Ldloc_2 | Ldloc_3 | Ldloc_S | Ldloc | Ldnull | Ldc_I4_M1 | Ldc_I4_0 | Ldc_I4_1
            | Ldc_I4_2 | Ldc_I4_3 | Ldc_I4_4 | Ldc_I4_5 | Ldc_I4_6 | Ldc_I4_7 | Ldc_I4_8
            | Ldc_I4_S | Ldc_I4 | Ldc_I8 | Ldc_R4 | Ldc_R8 => (0, 1),
            Stloc_0 | Stloc_1 | Stloc_2 | Stloc_3 | Stloc_S | Stloc | Starg_S | Starg | Pop
            | Brfalse_S | Brtrue_S | Brfalse | Brtrue => (1, 0),
            Dup => (1, 2),
            Beq_S | Bge_S | Bgt_S | Ble_S | Blt_S | Bne_Un_S | Bge_Un_S | Bgt_Un_S | Ble_Un_S
            | Blt_Un_S | Beq | Bge | Bgt | Ble | Blt | Bne_Un | Bge_Un | Bgt_Un | Ble_Un
            | Blt_Un => (2, 0),
            Stind_I1 | Stind_I2 | Stind_I4 | Stind_I8 | Stind_R4 | Stind_R8 => (2, 0),
            Ldind_I1 | Ldind_U1 | Ldind_I2 | Ldind_U2 | Ldind_I4 | Ldind_U4 | Ldind_I8
            | Ldind_I | Ldind_R4 | Ldind_R8 => (1, 1),
            Neg | Not | Conv_I1 | Conv_I2 | Conv_I4 | Conv_I8 | Conv_R4 | Conv_R8 | Conv_U4
            | Conv_U8 | Conv_R_Un | Conv_U2 | Conv_U1 | Conv_I | Conv_U => (1, 1),
            Add | Sub | Mul | Div | Div_Un | Rem | Rem_Un | And | Or | Xor | Shl | Shr | Shr_Un
            | Ceq | Cgt | Cgt_Un | Clt | Clt_Un => (2, 1),
        };
        StackEffect::Fixed { pops, pushes }
    }

    /// Check if this opcode is a branch (conditional or not)
    pub fn is_branch(self) -> bool {
        matches!(self.flow(), FlowControl::Branch | FlowControl::CondBranch)
    }

    /// Check if this opcode ends a basic block
    pub fn is_terminator(self) -> bool {
        matches!(
            self.flow(),
            FlowControl::Branch | FlowControl::CondBranch | FlowControl::Return
        )
    }

    /// Short-form branch opcode with the same condition, if this is a long branch
    pub fn short_form(self) -> Option<Self> {
        use Opcode::*;
        Some(match self {
            Br => Br_S,
            Brfalse => Brfalse_S,
            Brtrue => Brtrue_S,
            Beq => Beq_S,
            Bge => Bge_S,
            Bgt => Bgt_S,
            Ble => Ble_S,
            Blt => Blt_S,
            Bne_Un => Bne_Un_S,
            Bge_Un => Bge_Un_S,
            Bgt_Un => Bgt_Un_S,
            Ble_Un => Ble_Un_S,
            Blt_Un => Blt_Un_S,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
