//! Cursor for rewriting an [`InstructionSet`] in place

use super::instruction::Instruction;
use super::instruction_set::{InstrId, InstructionSet};
use super::operand::Operand;

/// Mutable cursor positioned on one instruction
pub struct Context<'a> {
    set: &'a mut InstructionSet,
    position: InstrId,
}

impl<'a> Context<'a> {
    pub fn new(set: &'a mut InstructionSet, position: InstrId) -> Self {
        Context { set, position }
    }

    pub fn position(&self) -> InstrId {
        self.position
    }

    pub fn goto(&mut self, id: InstrId) {
        self.position = id;
    }

    /// Move to the next live instruction
    pub fn goto_next(&mut self) -> bool {
        let mut cursor = self.set.next(self.position);
        while let Some(id) = cursor {
            if !self.set.is_ignored(id) {
                self.position = id;
                return true;
            }
            cursor = self.set.next(id);
        }
        false
    }

    /// Move to the previous live instruction
    pub fn goto_prev(&mut self) -> bool {
        let mut cursor = self.set.prev(self.position);
        while let Some(id) = cursor {
            if !self.set.is_ignored(id) {
                self.position = id;
                return true;
            }
            cursor = self.set.prev(id);
        }
        false
    }

    pub fn instruction(&self) -> &Instruction {
        self.set.get(self.position)
    }

    pub fn instruction_mut(&mut self) -> &mut Instruction {
        self.set.get_mut(self.position)
    }

    pub fn is_ignored(&self) -> bool {
        self.set.is_ignored(self.position)
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.instruction().operands.get(index)
    }

    pub fn set_operand(&mut self, index: usize, operand: Operand) {
        self.instruction_mut().operands[index] = operand;
    }

    pub fn result(&self, index: usize) -> Option<&Operand> {
        self.instruction().results.get(index)
    }

    pub fn set_result(&mut self, index: usize, operand: Operand) {
        self.instruction_mut().results[index] = operand;
    }

    pub fn set_operands(&mut self, operands: Vec<Operand>) {
        self.set.set_operands(self.position, operands);
    }

    pub fn replace(&mut self, instr: Instruction) {
        self.set.replace(self.position, instr);
    }

    /// Insert before the cursor; the cursor does not move
    pub fn insert_before(&mut self, instr: Instruction) -> InstrId {
        self.set.insert_before(self.position, instr)
    }

    /// Insert after the cursor; the cursor does not move
    pub fn insert_after(&mut self, instr: Instruction) -> InstrId {
        self.set.insert_after(self.position, instr)
    }

    pub fn remove(&mut self) {
        self.set.remove(self.position);
    }

    /// Replace the current instruction with a sequence
    ///
    /// The first instruction takes over the current slot and the rest follow
    /// it in order. The cursor ends on the last one. An empty sequence removes
    /// the current instruction.
    pub fn replace_with_sequence(&mut self, sequence: Vec<Instruction>) {
        let mut sequence = sequence.into_iter();
        match sequence.next() {
            None => self.remove(),
            Some(first) => {
                self.replace(first);
                for instr in sequence {
                    self.position = self.set.insert_after(self.position, instr);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrOp;

    fn op(n: i32) -> Instruction {
        Instruction::ir(IrOp::Move, vec![], vec![Operand::i32(n)])
    }

    #[test]
    fn test_replace_with_sequence() {
        let mut set = InstructionSet::new();
        let a = set.append(op(1));
        let b = set.append(op(2));
        set.append(op(3));

        let mut ctx = Context::new(&mut set, b);
        ctx.replace_with_sequence(vec![op(20), op(21), op(22)]);
        let last = ctx.position();
        assert!(ctx.goto_next());
        assert_eq!(ctx.operand(0).and_then(|o| o.constant_value()), Some(3));

        let order: Vec<i64> = set
            .iter()
            .map(|(_, i)| i.operands[0].constant_value().unwrap())
            .collect();
        assert_eq!(order, vec![1, 20, 21, 22, 3]);
        assert_eq!(set.get(last).operands[0].constant_value(), Some(22));

        let mut ctx = Context::new(&mut set, a);
        ctx.replace_with_sequence(Vec::new());
        assert!(set.is_ignored(a));
    }

    #[test]
    fn test_navigation_skips_ignored() {
        let mut set = InstructionSet::new();
        let a = set.append(op(1));
        let b = set.append(op(2));
        let c = set.append(op(3));
        set.remove(b);
        let mut ctx = Context::new(&mut set, a);
        assert!(ctx.goto_next());
        assert_eq!(ctx.position(), c);
        assert!(!ctx.goto_next());
        assert!(ctx.goto_prev());
        assert_eq!(ctx.position(), a);
    }
}
