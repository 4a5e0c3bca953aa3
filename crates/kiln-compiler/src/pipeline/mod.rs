//! Stage pipeline
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage names the
//! stages it must run before or after; [`Pipeline::new`] orders them with a
//! topological sort that breaks ties by declaration order and reports a cycle
//! as an error. Constraints naming a stage that is not present are ignored.
//!
//! Stages exchange results through a [`StageContext`]: a stage publishes one
//! [`Artifact`] under its [`Capability`], and later stages ask for the artifact
//! of the nearest earlier stage providing a capability.

pub mod method;

pub use method::{CodegenOptions, MethodCompilation, Position};

use crate::error::CompileError;
use crate::stages::decode::DecodeSummary;
use crate::stages::dominance::DominanceInfo;
use crate::stages::ssa::SsaSummary;
use std::collections::BTreeSet;
use thiserror::Error;

/// Pipeline construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Ordering constraints form a cycle among: {}", .stages.join(", "))]
    Cycle { stages: Vec<&'static str> },

    #[error("Stage '{0}' registered twice")]
    DuplicateStage(&'static str),
}

/// What a stage provides to later stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Decoding,
    BlockDiscovery,
    Canonicalization,
    Dominance,
    Ssa,
    SsaDestruction,
    Lowering,
    Emission,
}

/// Ordering constraint relative to another stage, by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Before(&'static str),
    After(&'static str),
}

/// Result published by a stage
#[derive(Debug, Clone)]
pub enum Artifact {
    Decoded(DecodeSummary),
    Dominance(DominanceInfo),
    Ssa(SsaSummary),
}

/// A compilation stage
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn capability(&self) -> Option<Capability> {
        None
    }

    fn constraints(&self) -> Vec<Constraint> {
        Vec::new()
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError>;
}

/// Per-run view of the pipeline handed to each stage
pub struct StageContext<'p> {
    stages: &'p [Box<dyn Stage>],
    current: usize,
    artifacts: Vec<Option<Artifact>>,
}

impl<'p> StageContext<'p> {
    fn new(stages: &'p [Box<dyn Stage>]) -> Self {
        StageContext {
            stages,
            current: 0,
            artifacts: stages.iter().map(|_| None).collect(),
        }
    }

    /// Name of the running stage
    pub fn stage(&self) -> &'static str {
        self.stages[self.current].name()
    }

    /// Publish the running stage's artifact, replacing an earlier one
    pub fn publish(&mut self, artifact: Artifact) {
        self.artifacts[self.current] = Some(artifact);
    }

    /// Index of the nearest earlier stage providing `capability`
    fn provider(&self, capability: Capability) -> Option<usize> {
        (0..self.current)
            .rev()
            .find(|&i| self.stages[i].capability() == Some(capability))
    }

    /// Artifact of the nearest earlier provider of `capability`
    pub fn artifact(&self, capability: Capability) -> Option<&Artifact> {
        self.provider(capability).and_then(|i| self.artifacts[i].as_ref())
    }

    fn missing(&self, capability: Capability) -> CompileError {
        CompileError::invariant(format!(
            "stage '{}' requires {:?} but no earlier stage published it",
            self.stage(),
            capability
        ))
    }

    pub fn decoded(&self) -> Result<&DecodeSummary, CompileError> {
        match self.artifact(Capability::Decoding) {
            Some(Artifact::Decoded(summary)) => Ok(summary),
            _ => Err(self.missing(Capability::Decoding)),
        }
    }

    pub fn dominance(&self) -> Result<&DominanceInfo, CompileError> {
        match self.artifact(Capability::Dominance) {
            Some(Artifact::Dominance(info)) => Ok(info),
            _ => Err(self.missing(Capability::Dominance)),
        }
    }

    pub fn ssa(&self) -> Option<&SsaSummary> {
        match self.artifact(Capability::Ssa) {
            Some(Artifact::Ssa(summary)) => Some(summary),
            _ => None,
        }
    }
}

/// Ordered stages
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stage_names()).finish()
    }
}

impl Pipeline {
    /// Order `stages` by their constraints
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self, PipelineError> {
        let order = sort_stages(&stages)?;
        let mut slots: Vec<Option<Box<dyn Stage>>> = stages.into_iter().map(Some).collect();
        let stages = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(Pipeline { stages })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage over one method, stopping at the first error
    pub fn run(&self, method: &mut MethodCompilation<'_>) -> Result<(), CompileError> {
        let mut ctx = StageContext::new(&self.stages);
        for (i, stage) in self.stages.iter().enumerate() {
            ctx.current = i;
            method.position.stage = Some(stage.name());
            log::trace!("{}: {}", method.method.name, stage.name());
            stage.run(method, &mut ctx)?;
        }
        Ok(())
    }
}

/// Kahn's algorithm; the ready set is ordered by declaration index
fn sort_stages(stages: &[Box<dyn Stage>]) -> Result<Vec<usize>, PipelineError> {
    let n = stages.len();
    let index_of = |name: &str| stages.iter().position(|s| s.name() == name);

    for (i, stage) in stages.iter().enumerate() {
        if index_of(stage.name()) != Some(i) {
            return Err(PipelineError::DuplicateStage(stage.name()));
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (i, stage) in stages.iter().enumerate() {
        for constraint in stage.constraints() {
            let (from, to) = match constraint {
                Constraint::Before(name) => match index_of(name) {
                    Some(other) => (i, other),
                    None => continue,
                },
                Constraint::After(name) => match index_of(name) {
                    Some(other) => (other, i),
                    None => continue,
                },
            };
            if !successors[from].contains(&to) {
                successors[from].push(to);
                indegree[to] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() < n {
        let stages = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| stages[i].name())
            .collect();
        return Err(PipelineError::Cycle { stages });
    }
    Ok(order)
}
