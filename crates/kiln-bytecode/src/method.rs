//! Resolved method metadata
//!
//! A [`MethodDef`] is what the metadata loader hands to the compiler for one
//! method: the raw body bytes plus everything the body refers to, already
//! resolved (signature, local types, call targets).

use crate::types::ElementType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resolved call target referenced by a `call` token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    /// Linker symbol of the callee
    pub symbol: String,
    /// Parameter types, in declaration order
    #[serde(default)]
    pub params: Vec<ElementType>,
    /// Return type
    #[serde(default = "default_return")]
    pub ret: ElementType,
}

fn default_return() -> ElementType {
    ElementType::Void
}

impl CallTarget {
    /// Create a call target
    pub fn new(symbol: impl Into<String>, params: Vec<ElementType>, ret: ElementType) -> Self {
        Self {
            symbol: symbol.into(),
            params,
            ret,
        }
    }
}

/// One method ready for compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Linker symbol for the compiled body
    pub name: String,
    /// Metadata token, stored in the frame for stack walking
    pub token: u32,
    /// Parameter types
    #[serde(default)]
    pub params: Vec<ElementType>,
    /// Local variable types
    #[serde(default)]
    pub locals: Vec<ElementType>,
    /// Return type
    #[serde(default = "default_return")]
    pub ret: ElementType,
    /// Bytecode body
    #[serde(default)]
    pub code: Vec<u8>,
    /// Call targets by token
    #[serde(default)]
    pub calls: BTreeMap<u32, CallTarget>,
}

impl MethodDef {
    /// Create an empty `void` method with no parameters
    pub fn new(name: impl Into<String>, token: u32) -> Self {
        Self {
            name: name.into(),
            token,
            params: Vec::new(),
            locals: Vec::new(),
            ret: ElementType::Void,
            code: Vec::new(),
            calls: BTreeMap::new(),
        }
    }

    /// Set the parameter types
    pub fn with_params(mut self, params: Vec<ElementType>) -> Self {
        self.params = params;
        self
    }

    /// Set the local types
    pub fn with_locals(mut self, locals: Vec<ElementType>) -> Self {
        self.locals = locals;
        self
    }

    /// Set the return type
    pub fn returning(mut self, ret: ElementType) -> Self {
        self.ret = ret;
        self
    }

    /// Set the bytecode body
    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Register a resolved call target for `token`
    pub fn with_call(mut self, token: u32, target: CallTarget) -> Self {
        self.calls.insert(token, target);
        self
    }

    /// Look up a call target
    pub fn call_target(&self, token: u32) -> Option<&CallTarget> {
        self.calls.get(&token)
    }
}
