//! Block discovery
//!
//! Closes every `BlockStart` emitted by decoding with a `BlockEnd`, appends
//! the shared epilogue block and links the control flow graph from the last
//! instruction of each block.

use crate::error::CompileError;
use crate::ir::{BlockId, Instruction, IrOp, LabelId, Opcode};
use crate::pipeline::{Capability, Constraint, MethodCompilation, Stage, StageContext};

pub struct BlockDiscoveryStage;

impl Stage for BlockDiscoveryStage {
    fn name(&self) -> &'static str {
        "block-discovery"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::BlockDiscovery)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("decode")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        let expected = ctx.decoded()?.leaders.len() + 1;
        if !method.blocks.is_empty() {
            return Err(CompileError::invariant("blocks already discovered"));
        }
        create_blocks(method)?;
        if method.blocks.len() != expected {
            return Err(CompileError::invariant(format!(
                "found {} blocks but decoding produced {} leaders",
                method.blocks.len(),
                expected - 1
            )));
        }
        link_blocks(method)?;
        log::trace!("{}: {} blocks", method.method.name, method.blocks.len());
        Ok(())
    }
}

fn create_blocks(method: &mut MethodCompilation<'_>) -> Result<(), CompileError> {
    let set = &mut method.instructions;
    set.append(Instruction::block_start(LabelId::EPILOGUE));

    let starts: Vec<_> = set
        .iter()
        .filter(|(_, instr)| instr.opcode == Opcode::BlockStart)
        .map(|(id, _)| id)
        .collect();

    for (i, &start) in starts.iter().enumerate() {
        let end = match starts.get(i + 1) {
            Some(&next) => set.insert_before(next, Instruction::block_end()),
            None => set.append(Instruction::block_end()),
        };
        let label = set
            .get(start)
            .target
            .ok_or_else(|| CompileError::invariant(format!("block start {} has no label", start)))?;
        let id = method.blocks.create(label, start, end);
        set.get_mut(start).block = Some(id);
        set.get_mut(end).block = Some(id);
    }
    Ok(())
}

fn link_blocks(method: &mut MethodCompilation<'_>) -> Result<(), CompileError> {
    let count = method.blocks.len();
    let resolve = |method: &MethodCompilation<'_>, label: LabelId| {
        method
            .blocks
            .by_label(label)
            .ok_or_else(|| CompileError::invariant(format!("branch to unknown block {}", label)))
    };

    for index in 0..count {
        let id = BlockId(index as u32);
        if method.blocks.get(id).label == LabelId::EPILOGUE {
            continue;
        }
        let next = (index + 1 < count).then(|| BlockId(index as u32 + 1));
        let body = method.blocks.instructions(&method.instructions, id);
        let last = body.last().map(|&i| method.instructions.get(i));

        let mut successors = Vec::with_capacity(2);
        match last.and_then(|i| i.ir_op().map(|op| (op, i.target))) {
            Some((IrOp::Jmp, Some(target))) => successors.push(resolve(method, target)?),
            Some((IrOp::IntegerCompareBranch | IrOp::FloatCompareBranch, Some(target))) => {
                successors.push(resolve(method, target)?);
                successors.extend(next);
            }
            Some((IrOp::Return, _)) => successors.push(resolve(method, LabelId::EPILOGUE)?),
            Some((IrOp::Jmp | IrOp::IntegerCompareBranch | IrOp::FloatCompareBranch, None)) => {
                return Err(CompileError::invariant(format!("branch without target in {}", id)));
            }
            _ => match next {
                Some(next) => successors.push(next),
                None => return Err(CompileError::invariant(format!("{} falls off the method", id))),
            },
        }
        for succ in successors {
            method.blocks.link(id, succ);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::stages::decode::DecodeStage;
    use kiln_bytecode::{BytecodeWriter, ElementType, MethodDef, Opcode as Bc};

    fn discover(def: &MethodDef) -> MethodCompilation<'_> {
        let pipeline = Pipeline::new(vec![Box::new(DecodeStage), Box::new(BlockDiscoveryStage)]).unwrap();
        let mut method = MethodCompilation::new(def, Default::default());
        pipeline.run(&mut method).unwrap();
        method
    }

    #[test]
    fn test_straight_line_method() {
        let def = MethodDef::new("Nop", 1).with_code(vec![0x00, 0x2A]);
        let method = discover(&def);
        let labels: Vec<LabelId> = method.blocks.iter().map(|b| b.label).collect();
        assert_eq!(labels, vec![LabelId::PROLOGUE, LabelId(0), LabelId::EPILOGUE]);
        assert_eq!(method.blocks.get(BlockId(0)).successors, vec![BlockId(1)]);
        assert_eq!(method.blocks.get(BlockId(1)).successors, vec![BlockId(2)]);
        assert_eq!(method.blocks.get(BlockId(2)).predecessors, vec![BlockId(1)]);

        for block in method.blocks.iter() {
            assert_eq!(method.instructions.get(block.first).block, Some(block.id));
            assert_eq!(method.instructions.get(block.last).opcode, Opcode::BlockEnd);
        }
    }

    #[test]
    fn test_loop_edges() {
        // i = 0; do { i++ } while (i < 10); return i
        let mut w = BytecodeWriter::new();
        let top = w.new_label();
        w.ldc_i4(0).stloc(0);
        w.mark(top);
        w.ldloc(0).ldc_i4(1).emit(Bc::Add).stloc(0);
        w.ldloc(0).ldc_i4(10);
        w.branch(Bc::Blt_S, top).unwrap();
        w.ldloc(0).emit(Bc::Ret);
        let def = MethodDef::new("Loop", 1)
            .with_locals(vec![ElementType::I4])
            .returning(ElementType::I4)
            .with_code(w.finish().unwrap());
        let method = discover(&def);

        // prologue, entry, loop body, exit, epilogue
        assert_eq!(method.blocks.len(), 5);
        let body = BlockId(2);
        assert_eq!(method.blocks.get(body).successors, vec![body, BlockId(3)]);
        assert_eq!(method.blocks.get(body).predecessors, vec![BlockId(1), body]);
        assert_eq!(method.blocks.get(BlockId(3)).successors, vec![BlockId(4)]);
    }
}
