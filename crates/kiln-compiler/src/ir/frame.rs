//! Stack frame layout
//!
//! ```text
//! [ebp+8+n]  parameters, first parameter lowest
//! [ebp+4]    return address
//! [ebp+0]    saved ebp
//! [ebp-4]    method token
//! [ebp-8..]  locals, then temporaries
//! ```
//!
//! Every slot is four bytes except eight-byte values. The frame size is the
//! number of bytes reserved below EBP and only grows.

use super::operand::{Operand, SlotOrigin, StackSlot};
use super::types::ValueType;

/// EBP-relative offset of the method token
pub const TOKEN_OFFSET: i32 = -4;

#[derive(Debug, Clone)]
pub struct StackFrame {
    params: Vec<Operand>,
    locals: Vec<Operand>,
    /// Bytes reserved below EBP, token slot included
    reserved: u32,
    temps: u32,
}

impl StackFrame {
    pub fn new(params: &[ValueType], locals: &[ValueType]) -> Self {
        let mut offset = 8i32;
        let params = params
            .iter()
            .enumerate()
            .map(|(i, &ty)| {
                let slot = StackSlot {
                    offset,
                    version: 0,
                    origin: SlotOrigin::Param(i as u16),
                };
                offset += ty.slot_size() as i32;
                Operand::stack(slot, ty)
            })
            .collect();

        let mut frame = StackFrame {
            params,
            locals: Vec::new(),
            reserved: (-TOKEN_OFFSET) as u32,
            temps: 0,
        };
        frame.locals = locals
            .iter()
            .enumerate()
            .map(|(i, &ty)| frame.reserve(ty, SlotOrigin::Local(i as u16)))
            .collect();
        frame
    }

    fn reserve(&mut self, ty: ValueType, origin: SlotOrigin) -> Operand {
        self.reserved += ty.slot_size();
        let slot = StackSlot {
            offset: -(self.reserved as i32),
            version: 0,
            origin,
        };
        Operand::stack(slot, ty)
    }

    pub fn param(&self, index: u16) -> Option<&Operand> {
        self.params.get(usize::from(index))
    }

    pub fn local(&self, index: u16) -> Option<&Operand> {
        self.locals.get(usize::from(index))
    }

    pub fn params(&self) -> &[Operand] {
        &self.params
    }

    pub fn locals(&self) -> &[Operand] {
        &self.locals
    }

    /// Fresh compiler temporary
    pub fn allocate_temp(&mut self, ty: ValueType) -> Operand {
        let origin = SlotOrigin::Temp(self.temps);
        self.temps += 1;
        self.reserve(ty, origin)
    }

    /// Bytes reserved below EBP
    pub fn size(&self) -> u32 {
        self.reserved
    }

    /// Bytes of incoming arguments
    pub fn parameter_bytes(&self) -> u32 {
        self.params.iter().map(|p| p.ty.slot_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let mut frame = StackFrame::new(
            &[ValueType::I4, ValueType::I8, ValueType::U1],
            &[ValueType::I2, ValueType::R8],
        );
        let offsets: Vec<i32> = frame.params().iter().map(|p| p.stack_slot().unwrap().offset).collect();
        assert_eq!(offsets, vec![8, 12, 20]);
        assert_eq!(frame.parameter_bytes(), 16);

        assert_eq!(frame.local(0).unwrap().stack_slot().unwrap().offset, -8);
        assert_eq!(frame.local(1).unwrap().stack_slot().unwrap().offset, -16);
        assert_eq!(frame.size(), 16);

        let t = frame.allocate_temp(ValueType::I4);
        assert_eq!(t.stack_slot().unwrap().offset, -20);
        assert_eq!(t.stack_slot().unwrap().origin, SlotOrigin::Temp(0));
        assert_eq!(frame.size(), 20);
    }

    #[test]
    fn test_empty_frame_still_holds_token() {
        let frame = StackFrame::new(&[], &[]);
        assert_eq!(frame.size(), 4);
        assert!(frame.param(0).is_none());
    }
}
