//! Dominator tree and dominance frontiers
//!
//! Immediate dominators come from the iterative algorithm of Cooper, Harvey
//! and Kennedy over reverse postorder; frontiers are collected by walking up
//! from each predecessor of a join block to the join's immediate dominator.
//! Unreachable blocks have no dominator and an empty frontier.

use crate::error::CompileError;
use crate::ir::{BasicBlocks, BlockId};
use crate::pipeline::{Artifact, Capability, Constraint, MethodCompilation, Stage, StageContext};

/// Dominance facts for one method
#[derive(Debug, Clone, Default)]
pub struct DominanceInfo {
    idom: Vec<Option<BlockId>>,
    frontier: Vec<Vec<BlockId>>,
    in_any_frontier: Vec<bool>,
    rpo: Vec<BlockId>,
}

impl DominanceInfo {
    pub fn compute(blocks: &BasicBlocks) -> Self {
        let n = blocks.len();
        let rpo = blocks.reverse_post_order();
        let mut info = DominanceInfo {
            idom: vec![None; n],
            frontier: vec![Vec::new(); n],
            in_any_frontier: vec![false; n],
            rpo,
        };
        let Some(&entry) = info.rpo.first() else {
            return info;
        };

        let mut order = vec![usize::MAX; n];
        for (i, b) in info.rpo.iter().enumerate() {
            order[b.index()] = i;
        }

        info.idom[entry.index()] = Some(entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in info.rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &blocks.get(b).predecessors {
                    if info.idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&info.idom, &order, p, current),
                    });
                }
                if new_idom.is_some() && info.idom[b.index()] != new_idom {
                    info.idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        for &b in &info.rpo {
            let preds: Vec<BlockId> = blocks
                .get(b)
                .predecessors
                .iter()
                .copied()
                .filter(|p| info.idom[p.index()].is_some())
                .collect();
            if preds.len() < 2 {
                continue;
            }
            let Some(stop) = info.idom[b.index()] else {
                continue;
            };
            for p in preds {
                let mut runner = p;
                while runner != stop {
                    let df = &mut info.frontier[runner.index()];
                    if !df.contains(&b) {
                        df.push(b);
                    }
                    info.in_any_frontier[b.index()] = true;
                    match info.idom[runner.index()] {
                        Some(up) if up != runner => runner = up,
                        _ => break,
                    }
                }
            }
        }
        for df in &mut info.frontier {
            df.sort_unstable();
        }
        info
    }

    /// Immediate dominator; the entry is its own
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            match self.idom(cursor) {
                Some(up) if up != cursor => cursor = up,
                _ => return false,
            }
        }
    }

    pub fn frontier(&self, block: BlockId) -> &[BlockId] {
        self.frontier.get(block.index()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `block` is in the frontier of any block
    pub fn in_frontier(&self, block: BlockId) -> bool {
        self.in_any_frontier.get(block.index()).copied().unwrap_or(false)
    }

    /// Blocks in the union of all frontiers
    pub fn frontier_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.in_any_frontier
            .iter()
            .enumerate()
            .filter(|(_, &member)| member)
            .map(|(i, _)| BlockId(i as u32))
    }

    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.idom(block).is_some()
    }
}

fn intersect(idom: &[Option<BlockId>], order: &[usize], a: BlockId, b: BlockId) -> BlockId {
    let (mut a, mut b) = (a, b);
    while a != b {
        while order[a.index()] > order[b.index()] {
            a = idom[a.index()].unwrap_or(a);
        }
        while order[b.index()] > order[a.index()] {
            b = idom[b.index()].unwrap_or(b);
        }
    }
    a
}

pub struct DominanceStage;

impl Stage for DominanceStage {
    fn name(&self) -> &'static str {
        "dominance"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Dominance)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("block-discovery")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        if method.blocks.is_empty() {
            return Err(CompileError::invariant("dominance requires discovered blocks"));
        }
        let info = DominanceInfo::compute(&method.blocks);
        log::trace!(
            "{}: {} of {} blocks reachable, {} join points",
            method.method.name,
            info.rpo.len(),
            method.blocks.len(),
            info.frontier_blocks().count()
        );
        ctx.publish(Artifact::Dominance(info));
        Ok(())
    }
}
