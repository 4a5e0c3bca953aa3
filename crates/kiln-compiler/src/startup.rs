//! Startup method
//!
//! The image's entry method runs every registered type initializer in
//! registration order and then calls the program entry point. It has the same
//! frame shape as a compiled method, so stack walks see a token of zero.

use crate::error::CompileError;
use crate::ir::{Instruction, StackFrame};
use crate::x86::{asm, frame, MachineCodeEmitter, MethodCode};

pub const DEFAULT_STARTUP_SYMBOL: &str = "AssemblyInit";

/// Builds the startup method
#[derive(Debug, Clone)]
pub struct StartupBuilder {
    symbol: String,
    initializers: Vec<String>,
    entry_point: Option<String>,
}

impl Default for StartupBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_STARTUP_SYMBOL)
    }
}

impl StartupBuilder {
    pub fn new(symbol: impl Into<String>) -> Self {
        StartupBuilder {
            symbol: symbol.into(),
            initializers: Vec::new(),
            entry_point: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Register a type initializer; registering one twice keeps the first position
    pub fn type_initializer(&mut self, symbol: impl Into<String>) -> &mut Self {
        let symbol = symbol.into();
        if !self.initializers.contains(&symbol) {
            self.initializers.push(symbol);
        }
        self
    }

    pub fn entry_point(&mut self, symbol: impl Into<String>) -> &mut Self {
        self.entry_point = Some(symbol.into());
        self
    }

    /// Every symbol the startup method calls, in call order
    pub fn callees(&self) -> impl Iterator<Item = &str> {
        self.initializers
            .iter()
            .chain(self.entry_point.iter())
            .map(String::as_str)
    }

    /// Machine instructions of the startup method
    pub fn instructions(&self) -> Vec<Instruction> {
        let size = StackFrame::new(&[], &[]).size();
        let mut code = frame::prologue(size, 0, true);
        code.extend(self.callees().map(asm::call));
        code.extend(frame::epilogue(size, true));
        code
    }

    pub fn build(&self) -> Result<MethodCode, CompileError> {
        let mut emitter = MachineCodeEmitter::new(self.symbol.clone(), 8);
        for instr in &self.instructions() {
            emitter.emit(instr)?;
        }
        let code = emitter.finish()?;
        log::debug!(
            "{}: {} type initializers, entry point {}",
            self.symbol,
            self.initializers.len(),
            self.entry_point.as_deref().unwrap_or("<none>")
        );
        Ok(code)
    }
}
