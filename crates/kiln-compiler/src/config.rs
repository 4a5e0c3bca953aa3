//! Compiler configuration (kiln.toml)
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::pipeline::CodegenOptions;
use crate::startup::DEFAULT_STARTUP_SYMBOL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one compiler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Worker threads; 0 uses one per CPU
    #[serde(default)]
    pub workers: usize,

    /// Alignment of each method in `.text`
    #[serde(default = "default_text_alignment")]
    pub text_alignment: usize,

    /// Alignment of the literal pool after each method body
    #[serde(default = "default_literal_alignment")]
    pub literal_alignment: usize,

    /// Add the startup method to the image
    #[serde(default = "default_true")]
    pub emit_startup: bool,

    #[serde(default = "default_startup_symbol")]
    pub startup_symbol: String,

    /// Symbol called by the startup method after the type initializers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,

    /// Type initializer symbols, in the order they must run
    #[serde(default)]
    pub type_initializers: Vec<String>,

    /// Symbols provided by other objects at link time
    #[serde(default)]
    pub externals: Vec<String>,
}

fn default_text_alignment() -> usize {
    16
}

fn default_literal_alignment() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_startup_symbol() -> String {
    DEFAULT_STARTUP_SYMBOL.to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            workers: 0,
            text_alignment: default_text_alignment(),
            literal_alignment: default_literal_alignment(),
            emit_startup: true,
            startup_symbol: default_startup_symbol(),
            entry_point: None,
            type_initializers: Vec::new(),
            externals: Vec::new(),
        }
    }
}

impl CompilerConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CompilerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("text_alignment", self.text_alignment),
            ("literal_alignment", self.literal_alignment),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::Invalid(format!("{} must be a power of two, got {}", name, value)));
            }
        }
        if self.literal_alignment < 4 {
            return Err(ConfigError::Invalid(format!(
                "literal_alignment must be at least 4, got {}",
                self.literal_alignment
            )));
        }
        if self.emit_startup && self.startup_symbol.is_empty() {
            return Err(ConfigError::Invalid("startup_symbol cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Worker count with 0 resolved to the CPU count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    pub fn codegen_options(&self) -> CodegenOptions {
        CodegenOptions {
            literal_alignment: self.literal_alignment,
        }
    }
}
