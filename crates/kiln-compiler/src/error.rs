//! Compiler errors
//!
//! Per-method errors abort that method only; the scheduler records them as
//! [`MethodFailure`](crate::compiler::MethodFailure)s and keeps going.

use crate::pipeline::PipelineError;
use kiln_bytecode::DecodeError;
use kiln_object::ObjectError;
use serde::Serialize;
use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// The input bytecode or metadata is invalid
    #[error("Malformed input{}: {reason}", format_location(.offset, .opcode))]
    MalformedInput {
        offset: Option<u32>,
        opcode: Option<&'static str>,
        reason: String,
    },

    /// No encoding exists for the operand combination
    #[error("No encoding for {mnemonic} {dest}, {src}")]
    UnsupportedEncoding {
        mnemonic: &'static str,
        dest: String,
        src: String,
    },

    /// A compiler bug: some stage broke an invariant another relies on
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// A referenced symbol is neither defined nor declared external
    #[error("Unresolved symbol '{0}'")]
    UnresolvedSymbol(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

fn format_location(offset: &Option<u32>, opcode: &Option<&'static str>) -> String {
    match (*offset, *opcode) {
        (Some(offset), Some(opcode)) => format!(" at IL_{:04X} ({})", offset, opcode),
        (Some(offset), None) => format!(" at IL_{:04X}", offset),
        (None, Some(opcode)) => format!(" in {}", opcode),
        (None, None) => String::new(),
    }
}

/// Coarse error class reported per failed method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MalformedInput,
    UnsupportedEncoding,
    InternalInvariant,
    UnresolvedSymbol,
}

impl CompileError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        CompileError::MalformedInput {
            offset: None,
            opcode: None,
            reason: reason.into(),
        }
    }

    pub fn malformed_at(offset: u32, opcode: &'static str, reason: impl Into<String>) -> Self {
        CompileError::MalformedInput {
            offset: Some(offset),
            opcode: Some(opcode),
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        CompileError::InternalInvariant(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CompileError::MalformedInput { .. } | CompileError::Decode(_) => ErrorCategory::MalformedInput,
            CompileError::UnsupportedEncoding { .. } => ErrorCategory::UnsupportedEncoding,
            CompileError::UnresolvedSymbol(_) | CompileError::Object(ObjectError::UnresolvedSymbol { .. }) => {
                ErrorCategory::UnresolvedSymbol
            }
            CompileError::InternalInvariant(_) | CompileError::Object(_) | CompileError::Pipeline(_) => {
                ErrorCategory::InternalInvariant
            }
        }
    }

    /// Bytecode offset carried by the error itself
    pub fn offset(&self) -> Option<u32> {
        match self {
            CompileError::MalformedInput { offset, .. } => *offset,
            CompileError::Decode(DecodeError::UnknownOpcode { offset, .. })
            | CompileError::Decode(DecodeError::UnexpectedEnd { offset })
            | CompileError::Decode(DecodeError::BranchOutOfRange { offset, .. }) => Some(*offset as u32),
            _ => None,
        }
    }

    /// Map an object-writer error onto the compiler taxonomy
    pub fn from_object(error: ObjectError) -> Self {
        match error {
            ObjectError::UnresolvedSymbol { symbol, .. } => CompileError::UnresolvedSymbol(symbol),
            other => CompileError::Object(other),
        }
    }
}
