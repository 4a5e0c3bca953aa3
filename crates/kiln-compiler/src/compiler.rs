//! Method scheduler
//!
//! [`Compiler::compile_all`] fans methods out to worker threads through a
//! `crossbeam_deque::Injector`. Each worker runs the whole pipeline for one
//! method at a time and sends the result back over a channel. The driver
//! merges results into the [`ProgramImage`] in declaration order, so the
//! image does not depend on scheduling.

use crate::config::CompilerConfig;
use crate::error::{CompileError, ErrorCategory};
use crate::pipeline::{MethodCompilation, Pipeline};
use crate::stages;
use crate::startup::StartupBuilder;
use crate::x86::{MethodCode, RUNTIME_HELPERS};
use crossbeam::channel;
use crossbeam_deque::{Injector, Steal};
use kiln_bytecode::MethodDef;
use kiln_object::ProgramImage;
use serde::Serialize;
use std::path::Path;
use std::thread;

/// A method that did not compile
#[derive(Debug, Serialize)]
pub struct MethodFailure {
    pub method: String,
    /// Stage that raised the error
    pub stage: Option<&'static str>,
    /// Bytecode opcode being compiled, when known
    pub opcode: Option<&'static str>,
    /// Bytecode offset, when known
    pub offset: Option<u32>,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip)]
    pub error: CompileError,
}

impl MethodFailure {
    fn new(method: &MethodCompilation<'_>, error: CompileError) -> Self {
        let position = method.position;
        MethodFailure {
            method: method.method.name.clone(),
            stage: position.stage,
            opcode: position.opcode,
            offset: error.offset().or(position.offset),
            category: error.category(),
            message: error.to_string(),
            error,
        }
    }

    fn merge(method: &str, error: CompileError) -> Self {
        MethodFailure {
            method: method.to_string(),
            stage: Some("merge"),
            opcode: None,
            offset: None,
            category: error.category(),
            message: error.to_string(),
            error,
        }
    }
}

impl std::fmt::Display for MethodFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method)?;
        if let Some(stage) = self.stage {
            write!(f, " [{}]", stage)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Placement of a compiled method in `.text`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledMethod {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub relocations: usize,
}

/// Outcome of one [`Compiler::compile_all`] run
#[derive(Debug, Default, Serialize)]
pub struct CompileReport {
    pub methods: Vec<CompiledMethod>,
    pub failures: Vec<MethodFailure>,
    /// Length of `.text` after merging
    pub text_size: usize,
}

impl CompileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn method(&self, name: &str) -> Option<&CompiledMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Compiles methods into one program image
#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    pipeline: Pipeline,
    image: ProgramImage,
}

impl Compiler {
    /// Compiler with the default pipeline
    pub fn new(config: CompilerConfig) -> Result<Self, CompileError> {
        let pipeline = stages::default_pipeline()?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: CompilerConfig, pipeline: Pipeline) -> Self {
        Compiler {
            config,
            pipeline,
            image: ProgramImage::new(),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn image(&self) -> &ProgramImage {
        &self.image
    }

    /// Run the pipeline over one method without touching the image
    pub fn compile_method(&self, def: &MethodDef) -> Result<MethodCode, MethodFailure> {
        let mut method = MethodCompilation::new(def, self.config.codegen_options());
        log::debug!("compiling {} ({} bytes of bytecode)", def.name, def.code.len());
        if let Err(error) = self.pipeline.run(&mut method) {
            return Err(MethodFailure::new(&method, error));
        }
        method
            .code
            .take()
            .ok_or_else(|| MethodFailure::new(&method, CompileError::invariant("pipeline produced no code")))
    }

    /// Compile every method, then the startup method, into the image
    ///
    /// Failed methods are reported and skipped. Call once per image: the
    /// startup symbol is defined on every call.
    pub fn compile_all(&self, methods: &[MethodDef]) -> CompileReport {
        let workers = self.config.worker_count().min(methods.len()).max(1);
        log::info!("compiling {} methods on {} workers", methods.len(), workers);

        let mut results: Vec<Option<Result<MethodCode, MethodFailure>>> = Vec::new();
        results.resize_with(methods.len(), || None);

        let injector = Injector::new();
        for index in 0..methods.len() {
            injector.push(index);
        }
        let (sender, receiver) = channel::unbounded();

        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let injector = &injector;
                scope.spawn(move || loop {
                    let index = match injector.steal() {
                        Steal::Success(index) => index,
                        Steal::Empty => break,
                        Steal::Retry => continue,
                    };
                    let result = self.compile_method(&methods[index]);
                    if sender.send((index, result)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);
            for (index, result) in receiver.iter() {
                results[index] = Some(result);
            }
        });

        let mut report = CompileReport::default();
        for result in results.into_iter().flatten() {
            match result {
                Ok(code) => self.merge(code, &mut report),
                Err(failure) => {
                    log::warn!("{}", failure);
                    report.failures.push(failure);
                }
            }
        }

        if self.config.emit_startup {
            match self.startup().build() {
                Ok(code) => self.merge(code, &mut report),
                Err(error) => report
                    .failures
                    .push(MethodFailure::merge(&self.config.startup_symbol, error)),
            }
        }

        report.text_size = self.image.section_len(kiln_object::SectionKind::Text);
        log::info!(
            "compiled {} methods, {} failed, {} bytes of text",
            report.methods.len(),
            report.failures.len(),
            report.text_size
        );
        report
    }

    fn merge(&self, code: MethodCode, report: &mut CompileReport) {
        let name = code.symbol.clone();
        let size = code.code.len() as u32;
        let relocations = code.relocations.len();
        match self.image.merge(code.into_fragment(self.config.text_alignment)) {
            Ok(offset) => report.methods.push(CompiledMethod {
                name,
                offset,
                size,
                relocations,
            }),
            Err(error) => {
                let failure = MethodFailure::merge(&name, CompileError::from_object(error));
                log::warn!("{}", failure);
                report.failures.push(failure);
            }
        }
    }

    /// Startup method described by the configuration
    pub fn startup(&self) -> StartupBuilder {
        let mut builder = StartupBuilder::new(self.config.startup_symbol.clone());
        for initializer in &self.config.type_initializers {
            builder.type_initializer(initializer.clone());
        }
        if let Some(entry) = &self.config.entry_point {
            builder.entry_point(entry.clone());
        }
        builder
    }

    fn declare_externals(&self) {
        let mut image = self.image.lock();
        for name in self.config.externals.iter().map(String::as_str).chain(RUNTIME_HELPERS.iter().copied()) {
            image.declare_external(name);
        }
    }

    /// Encode the image as an ELF32 relocatable object
    pub fn object_bytes(&self) -> Result<Vec<u8>, CompileError> {
        self.declare_externals();
        self.image.write_elf32().map_err(CompileError::from_object)
    }

    /// Encode the image and write it to `path`
    pub fn write_object(&self, path: impl AsRef<Path>) -> Result<(), CompileError> {
        self.declare_externals();
        self.image.write_to_file(path).map_err(CompileError::from_object)
    }
}
