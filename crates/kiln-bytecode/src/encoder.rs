//! Bytecode encoding utilities
//!
//! [`BytecodeWriter`] builds method bodies: it picks the compact forms of
//! constant and variable opcodes and resolves forward branch labels when the
//! body is finished.

use crate::opcode::{Opcode, OperandKind};
use thiserror::Error;

/// Errors that can occur while finishing a body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A branch references a label that was never marked
    #[error("Label {0} referenced but never marked")]
    UnmarkedLabel(u32),

    /// A short branch cannot reach its label
    #[error("Short branch at offset {offset} cannot reach displacement {displacement}")]
    ShortBranchOutOfRange {
        /// Offset of the branch opcode
        offset: usize,
        /// Required displacement
        displacement: i64,
    },

    /// Opcode passed where a different operand shape was required
    #[error("Opcode {0} does not take this operand")]
    OperandMismatch(Opcode),
}

/// Branch label handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

struct Fixup {
    label: Label,
    opcode_offset: usize,
    displacement_offset: usize,
    short: bool,
}

/// Bytecode writer for encoding instructions
#[derive(Default)]
pub struct BytecodeWriter {
    buffer: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit an opcode without operands
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        opcode.write_to(&mut self.buffer);
        self
    }

    fn emit_with(&mut self, opcode: Opcode, kind: OperandKind, bytes: &[u8]) -> Result<&mut Self, EncodeError> {
        if opcode.operand_kind() != kind {
            return Err(EncodeError::OperandMismatch(opcode));
        }
        opcode.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(bytes);
        Ok(self)
    }

    // ===== Constants =====

    /// Push an int32 using the most compact encoding
    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        let opcode = match value {
            -1 => Opcode::Ldc_I4_M1,
            0 => Opcode::Ldc_I4_0,
            1 => Opcode::Ldc_I4_1,
            2 => Opcode::Ldc_I4_2,
            3 => Opcode::Ldc_I4_3,
            4 => Opcode::Ldc_I4_4,
            5 => Opcode::Ldc_I4_5,
            6 => Opcode::Ldc_I4_6,
            7 => Opcode::Ldc_I4_7,
            8 => Opcode::Ldc_I4_8,
            v if i8::try_from(v).is_ok() => {
                self.emit(Opcode::Ldc_I4_S);
                self.buffer.push(v as i8 as u8);
                return self;
            }
            v => {
                self.emit(Opcode::Ldc_I4);
                self.buffer.extend_from_slice(&v.to_le_bytes());
                return self;
            }
        };
        self.emit(opcode)
    }

    /// Push an int64
    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.emit(Opcode::Ldc_I8);
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Push a float32
    pub fn ldc_r4(&mut self, value: f32) -> &mut Self {
        self.emit(Opcode::Ldc_R4);
        self.buffer.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    /// Push a float64
    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.emit(Opcode::Ldc_R8);
        self.buffer.extend_from_slice(&value.to_bits().to_le_bytes());
        self
    }

    // ===== Arguments & Locals =====

    /// Load an argument
    pub fn ldarg(&mut self, index: u16) -> &mut Self {
        let short = [Opcode::Ldarg_0, Opcode::Ldarg_1, Opcode::Ldarg_2, Opcode::Ldarg_3];
        self.variable(index, &short, Opcode::Ldarg_S, Opcode::Ldarg)
    }

    /// Store an argument
    pub fn starg(&mut self, index: u16) -> &mut Self {
        self.variable(index, &[], Opcode::Starg_S, Opcode::Starg)
    }

    /// Load a local
    pub fn ldloc(&mut self, index: u16) -> &mut Self {
        let short = [Opcode::Ldloc_0, Opcode::Ldloc_1, Opcode::Ldloc_2, Opcode::Ldloc_3];
        self.variable(index, &short, Opcode::Ldloc_S, Opcode::Ldloc)
    }

    /// Store a local
    pub fn stloc(&mut self, index: u16) -> &mut Self {
        let short = [Opcode::Stloc_0, Opcode::Stloc_1, Opcode::Stloc_2, Opcode::Stloc_3];
        self.variable(index, &short, Opcode::Stloc_S, Opcode::Stloc)
    }

    fn variable(&mut self, index: u16, implied: &[Opcode], short: Opcode, long: Opcode) -> &mut Self {
        if let Some(&opcode) = implied.get(usize::from(index)) {
            return self.emit(opcode);
        }
        if let Ok(byte) = u8::try_from(index) {
            self.emit(short);
            self.buffer.push(byte);
        } else {
            self.emit(long);
            self.buffer.extend_from_slice(&index.to_le_bytes());
        }
        self
    }

    // ===== Calls & Branches =====

    /// Call the method identified by `token`
    pub fn call(&mut self, token: u32) -> Result<&mut Self, EncodeError> {
        self.emit_with(Opcode::Call, OperandKind::Token, &token.to_le_bytes())
    }

    /// Allocate an unmarked label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind `label` to the current offset
    pub fn mark(&mut self, label: Label) -> &mut Self {
        self.labels[label.0 as usize] = Some(self.buffer.len());
        self
    }

    /// Emit a branch (either form) to `label`
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> Result<&mut Self, EncodeError> {
        let short = match opcode.operand_kind() {
            OperandKind::ShortBranch => true,
            OperandKind::Branch => false,
            _ => return Err(EncodeError::OperandMismatch(opcode)),
        };
        let opcode_offset = self.buffer.len();
        opcode.write_to(&mut self.buffer);
        let displacement_offset = self.buffer.len();
        let width = if short { 1 } else { 4 };
        self.buffer.resize(displacement_offset + width, 0);
        self.fixups.push(Fixup {
            label,
            opcode_offset,
            displacement_offset,
            short,
        });
        Ok(self)
    }

    /// Resolve labels and return the finished body
    pub fn finish(mut self) -> Result<Vec<u8>, EncodeError> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0 as usize)
                .copied()
                .flatten()
                .ok_or(EncodeError::UnmarkedLabel(fixup.label.0))?;
            let width = if fixup.short { 1 } else { 4 };
            let next = fixup.displacement_offset + width;
            let displacement = target as i64 - next as i64;
            if fixup.short {
                let byte = i8::try_from(displacement).map_err(|_| EncodeError::ShortBranchOutOfRange {
                    offset: fixup.opcode_offset,
                    displacement,
                })?;
                self.buffer[fixup.displacement_offset] = byte as u8;
            } else {
                let bytes = (displacement as i32).to_le_bytes();
                self.buffer[fixup.displacement_offset..next].copy_from_slice(&bytes);
            }
        }
        Ok(self.buffer)
    }
}
