//! Arena of instructions linked in program order
//!
//! Instructions are never physically deleted: [`InstructionSet::remove`] sets
//! an ignored flag and every traversal skips ignored slots. Ids stay valid for
//! the lifetime of the set, so blocks can point at their boundary markers while
//! later stages insert code around them.

use super::instruction::Instruction;
use super::operand::Operand;
use std::fmt;

/// Index of an instruction slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

impl InstrId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    instr: Instruction,
    prev: Option<InstrId>,
    next: Option<InstrId>,
    ignored: bool,
}

/// Doubly linked instruction list backed by a vector
#[derive(Debug, Clone, Default)]
pub struct InstructionSet {
    slots: Vec<Slot>,
    head: Option<InstrId>,
    tail: Option<InstrId>,
}

impl InstructionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots ever allocated, ignored ones included
    pub fn capacity_used(&self) -> usize {
        self.slots.len()
    }

    /// Number of instructions not marked ignored
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| !s.ignored).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: InstrId) -> &Slot {
        match self.slots.get(id.index()) {
            Some(slot) => slot,
            None => panic!("instruction {} out of range ({} allocated)", id, self.slots.len()),
        }
    }

    fn slot_mut(&mut self, id: InstrId) -> &mut Slot {
        let allocated = self.slots.len();
        match self.slots.get_mut(id.index()) {
            Some(slot) => slot,
            None => panic!("instruction {} out of range ({} allocated)", id, allocated),
        }
    }

    fn allocate(&mut self, instr: Instruction, prev: Option<InstrId>, next: Option<InstrId>) -> InstrId {
        let id = InstrId(self.slots.len() as u32);
        self.slots.push(Slot {
            instr,
            prev,
            next,
            ignored: false,
        });
        match prev {
            Some(p) => self.slot_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.slot_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        id
    }

    // ===== Mutation =====

    /// Append at the end of the list
    pub fn append(&mut self, instr: Instruction) -> InstrId {
        let tail = self.tail;
        self.allocate(instr, tail, None)
    }

    pub fn insert_before(&mut self, at: InstrId, instr: Instruction) -> InstrId {
        let prev = self.slot(at).prev;
        self.allocate(instr, prev, Some(at))
    }

    pub fn insert_after(&mut self, at: InstrId, instr: Instruction) -> InstrId {
        let next = self.slot(at).next;
        self.allocate(instr, Some(at), next)
    }

    /// Overwrite the instruction in place, keeping its links
    pub fn replace(&mut self, at: InstrId, instr: Instruction) {
        let slot = self.slot_mut(at);
        slot.instr = instr;
        slot.ignored = false;
    }

    pub fn set_operands(&mut self, at: InstrId, operands: Vec<Operand>) {
        self.slot_mut(at).instr.operands = operands;
    }

    pub fn set_results(&mut self, at: InstrId, results: Vec<Operand>) {
        self.slot_mut(at).instr.results = results;
    }

    /// Mark ignored; the slot stays linked
    pub fn remove(&mut self, at: InstrId) {
        self.slot_mut(at).ignored = true;
    }

    // ===== Access =====

    pub fn get(&self, id: InstrId) -> &Instruction {
        &self.slot(id).instr
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.slot_mut(id).instr
    }

    pub fn is_ignored(&self, id: InstrId) -> bool {
        self.slot(id).ignored
    }

    /// Deep copy of an instruction
    pub fn clone_instruction(&self, id: InstrId) -> Instruction {
        self.slot(id).instr.clone()
    }

    pub fn first(&self) -> Option<InstrId> {
        self.head
    }

    pub fn last(&self) -> Option<InstrId> {
        self.tail
    }

    /// Raw successor link, ignored slots included
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.slot(id).next
    }

    /// Raw predecessor link, ignored slots included
    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.slot(id).prev
    }

    /// Live instructions in program order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            cursor: self.head,
        }
    }

    /// Snapshot of live ids in program order
    pub fn ids(&self) -> Vec<InstrId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Live ids strictly between two markers
    pub fn between(&self, first: InstrId, last: InstrId) -> Vec<InstrId> {
        let mut ids = Vec::new();
        let mut cursor = self.next(first);
        while let Some(id) = cursor {
            if id == last {
                break;
            }
            if !self.is_ignored(id) {
                ids.push(id);
            }
            cursor = self.next(id);
        }
        ids
    }
}

/// Iterator over live instructions
pub struct Iter<'a> {
    set: &'a InstructionSet,
    cursor: Option<InstrId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InstrId, &'a Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.cursor {
            let slot = self.set.slot(id);
            self.cursor = slot.next;
            if !slot.ignored {
                return Some((id, &slot.instr));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrOp, Opcode};

    fn op(n: i32) -> Instruction {
        Instruction::ir(IrOp::Move, vec![], vec![Operand::i32(n)])
    }

    fn values(set: &InstructionSet) -> Vec<i64> {
        set.iter()
            .map(|(_, i)| i.operands[0].constant_value().unwrap())
            .collect()
    }

    #[test]
    fn test_insert_and_order() {
        let mut set = InstructionSet::new();
        let a = set.append(op(1));
        let c = set.append(op(3));
        set.insert_after(a, op(2));
        set.insert_before(a, op(0));
        set.insert_after(c, op(4));
        assert_eq!(values(&set), vec![0, 1, 2, 3, 4]);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_remove_keeps_links() {
        let mut set = InstructionSet::new();
        let a = set.append(op(1));
        let b = set.append(op(2));
        let c = set.append(op(3));
        set.remove(b);
        assert_eq!(values(&set), vec![1, 3]);
        assert_eq!(set.next(a), Some(b));
        assert_eq!(set.between(a, c), Vec::<InstrId>::new());
        assert_eq!(set.capacity_used(), 3);

        set.insert_after(b, op(9));
        assert_eq!(values(&set), vec![1, 9, 3]);
    }

    #[test]
    fn test_replace_and_clone() {
        let mut set = InstructionSet::new();
        let a = set.append(op(1));
        let copy = set.clone_instruction(a);
        set.replace(a, op(7));
        set.set_operands(a, vec![Operand::i32(8)]);
        assert_eq!(values(&set), vec![8]);
        assert_eq!(copy.operands[0].constant_value(), Some(1));
        assert_eq!(set.get(a).opcode, Opcode::Ir(IrOp::Move));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_access_panics() {
        let set = InstructionSet::new();
        set.get(InstrId(3));
    }
}
