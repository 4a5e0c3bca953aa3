//! Basic blocks and the control flow graph

use super::instruction_set::{InstrId, InstructionSet};
use super::operand::LabelId;
use rustc_hash::FxHashMap;
use std::fmt;

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block delimited by a start and an end marker
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: LabelId,
    /// `BlockStart` marker
    pub first: InstrId,
    /// `BlockEnd` marker
    pub last: InstrId,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

/// Blocks of one method in layout order
#[derive(Debug, Clone, Default)]
pub struct BasicBlocks {
    blocks: Vec<BasicBlock>,
    by_label: FxHashMap<LabelId, BlockId>,
}

impl BasicBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a block; ids are assigned in layout order
    pub fn create(&mut self, label: LabelId, first: InstrId, last: InstrId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            label,
            first,
            last,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        self.by_label.insert(label, id);
        id
    }

    /// Add an edge; duplicate edges are ignored
    pub fn link(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.index()].successors.contains(&to) {
            self.blocks[from.index()].successors.push(to);
            self.blocks[to.index()].predecessors.push(from);
        }
    }

    pub fn get(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn by_label(&self, label: LabelId) -> Option<BlockId> {
        self.by_label.get(&label).copied()
    }

    /// First block in layout order
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|b| b.id)
    }

    /// Live instructions between the block's markers
    pub fn instructions(&self, set: &InstructionSet, id: BlockId) -> Vec<InstrId> {
        let block = self.get(id);
        set.between(block.first, block.last)
    }

    /// Reverse postorder from the entry; unreachable blocks are omitted
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        // (block, next successor index)
        let mut stack = vec![(entry, 0usize)];
        visited[entry.index()] = true;

        while let Some((block, next)) = stack.pop() {
            let succs = &self.blocks[block.index()].successors;
            if let Some(&succ) = succs.get(next) {
                stack.push((block, next + 1));
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                order.push(block);
            }
        }
        order.reverse();
        order
    }
}
