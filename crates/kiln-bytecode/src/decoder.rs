//! Bytecode decoder
//!
//! Turns a method body into a flat list of [`DecodedInstr`]. Branch
//! displacements are resolved to absolute body offsets and validated against
//! instruction boundaries, so later stages never see a dangling target.

use crate::opcode::{Opcode, OperandKind, EXTENDED_PREFIX};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Byte sequence is not a known opcode
    #[error("Unknown opcode 0x{opcode:04X} at offset {offset}")]
    UnknownOpcode {
        /// Tagged opcode value
        opcode: u16,
        /// Body offset of the opcode
        offset: usize,
    },

    /// Body ends inside an instruction
    #[error("Unexpected end of bytecode at offset {offset}")]
    UnexpectedEnd {
        /// Offset at which more bytes were needed
        offset: usize,
    },

    /// Branch target outside the body or not on an instruction boundary
    #[error("Branch at offset {offset} targets invalid offset {target}")]
    BranchOutOfRange {
        /// Offset of the branch instruction
        offset: usize,
        /// Resolved target offset
        target: i64,
    },
}

/// Decoded immediate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// No immediate
    None,
    /// 32-bit integer (short forms are sign-extended)
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// IEEE single
    Float32(f32),
    /// IEEE double
    Float64(f64),
    /// Argument or local index
    Index(u16),
    /// Metadata token
    Token(u32),
    /// Absolute branch target offset
    Target(usize),
}

/// A decoded bytecode instruction
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstr {
    /// Offset of the first opcode byte
    pub offset: usize,
    /// Opcode
    pub opcode: Opcode,
    /// Immediate operand
    pub immediate: Immediate,
    /// Encoded size in bytes
    pub size: usize,
}

impl DecodedInstr {
    /// Offset of the instruction that follows this one
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Absolute branch target, if this is a branch
    pub fn branch_target(&self) -> Option<usize> {
        match self.immediate {
            Immediate::Target(target) => Some(target),
            _ => None,
        }
    }

    /// Argument or local index, including the index implied by short opcodes
    pub fn variable_index(&self) -> Option<u16> {
        use Opcode::*;
        match self.opcode {
            Ldarg_0 | Ldloc_0 | Stloc_0 => Some(0),
            Ldarg_1 | Ldloc_1 | Stloc_1 => Some(1),
            Ldarg_2 | Ldloc_2 | Stloc_2 => Some(2),
            Ldarg_3 | Ldloc_3 | Stloc_3 => Some(3),
            _ => match self.immediate {
                Immediate::Index(index) => Some(index),
                _ => None,
            },
        }
    }
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        if end > self.code.len() {
            return Err(DecodeError::UnexpectedEnd { offset: self.pos });
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.code[self.pos..end]);
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }
}

/// Decode a full method body
pub fn decode_method(code: &[u8]) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut reader = Reader { code, pos: 0 };
    let mut instrs = Vec::new();

    while reader.pos < code.len() {
        let offset = reader.pos;
        let first = reader.read_u8()?;
        let tagged = if first == EXTENDED_PREFIX {
            0xFE00 | u16::from(reader.read_u8()?)
        } else {
            u16::from(first)
        };
        let opcode = Opcode::from_u16(tagged).ok_or(DecodeError::UnknownOpcode {
            opcode: tagged,
            offset,
        })?;

        let immediate = match opcode.operand_kind() {
            OperandKind::None => Immediate::None,
            OperandKind::Int8 => Immediate::Int32(i32::from(reader.read_u8()? as i8)),
            OperandKind::ShortIndex => Immediate::Index(u16::from(reader.read_u8()?)),
            OperandKind::Index => Immediate::Index(reader.read_u16()?),
            OperandKind::Int32 => Immediate::Int32(reader.read_i32()?),
            OperandKind::Int64 => Immediate::Int64(reader.read_i64()?),
            OperandKind::Float32 => Immediate::Float32(f32::from_bits(reader.read_u32()?)),
            OperandKind::Float64 => Immediate::Float64(f64::from_bits(reader.read_i64()? as u64)),
            OperandKind::Token => Immediate::Token(reader.read_u32()?),
            OperandKind::ShortBranch => {
                let rel = i64::from(reader.read_u8()? as i8);
                resolve_target(offset, reader.pos, rel, code.len())?
            }
            OperandKind::Branch => {
                let rel = i64::from(reader.read_i32()?);
                resolve_target(offset, reader.pos, rel, code.len())?
            }
        };

        instrs.push(DecodedInstr {
            offset,
            opcode,
            immediate,
            size: reader.pos - offset,
        });
    }

    // Targets must land on a decoded instruction
    let starts: BTreeSet<usize> = instrs.iter().map(|i| i.offset).collect();
    for instr in &instrs {
        if let Some(target) = instr.branch_target() {
            if !starts.contains(&target) {
                return Err(DecodeError::BranchOutOfRange {
                    offset: instr.offset,
                    target: target as i64,
                });
            }
        }
    }

    Ok(instrs)
}

fn resolve_target(
    offset: usize,
    next: usize,
    rel: i64,
    len: usize,
) -> Result<Immediate, DecodeError> {
    let target = next as i64 + rel;
    if target < 0 || target >= len as i64 {
        return Err(DecodeError::BranchOutOfRange { offset, target });
    }
    Ok(Immediate::Target(target as usize))
}
