//! SSA construction and destruction
//!
//! [`EnterSsaStage`] renames every frame slot access to a versioned value. It
//! walks the control flow graph with a worklist of `(block, predecessor,
//! live-in)` entries:
//!
//! - the first arrival at a join block (one in some dominance frontier)
//!   inserts a phi for each live slot and gives it a fresh version,
//! - later arrivals only append their incoming value to those phis,
//! - every other block is entered exactly once, since it has a single
//!   reachable predecessor.
//!
//! Bodies are renamed once, uses before definitions, and the live-out set is
//! handed to each successor. Versions are unique across the method.
//!
//! [`LeaveSsaStage`] undoes it. Every version of a slot shares the slot's
//! storage, so no copies are needed: phis are dropped once their incoming
//! values are shown to live in the result's slot, and versions reset to 0.

use crate::error::CompileError;
use crate::ir::{BlockId, InstrId, Instruction, IrOp, Opcode, Operand, SlotKey};
use crate::pipeline::{Artifact, Capability, Constraint, MethodCompilation, Stage, StageContext};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};

/// Counts published by enter-ssa
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsaSummary {
    pub phi_count: usize,
    /// Versions minted, phis included
    pub version_count: u32,
}

type LiveSet = BTreeMap<SlotKey, Operand>;

struct Arrival {
    block: BlockId,
    from: Option<BlockId>,
    live: LiveSet,
}

pub struct EnterSsaStage;

impl Stage for EnterSsaStage {
    fn name(&self) -> &'static str {
        "enter-ssa"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Ssa)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("dominance")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        let dominance = ctx.dominance()?;
        let entry = method
            .blocks
            .entry()
            .ok_or_else(|| CompileError::invariant("enter-ssa requires discovered blocks"))?;

        let mut live = LiveSet::new();
        for slot in method.frame.params().iter().chain(method.frame.locals()) {
            if let Some(key) = slot.slot_key() {
                live.insert(key, slot.with_version(0));
            }
        }

        let mut renamer = Renamer {
            version: 0,
            phis: FxHashMap::default(),
            entered: vec![false; method.blocks.len()],
            phi_count: 0,
        };
        let mut worklist = VecDeque::new();
        worklist.push_back(Arrival {
            block: entry,
            from: None,
            live,
        });

        while let Some(arrival) = worklist.pop_front() {
            let block = arrival.block;
            if renamer.entered[block.index()] {
                renamer.merge(method, &arrival);
                continue;
            }
            renamer.entered[block.index()] = true;

            let mut live = arrival.live;
            if dominance.in_frontier(block) {
                renamer.insert_phis(method, block, arrival.from, &mut live);
            }
            renamer.rename_body(method, block, &mut live)?;

            for &succ in &method.blocks.get(block).successors {
                worklist.push_back(Arrival {
                    block: succ,
                    from: Some(block),
                    live: live.clone(),
                });
            }
        }

        let summary = SsaSummary {
            phi_count: renamer.phi_count,
            version_count: renamer.version,
        };
        log::debug!(
            "{}: {} phis, {} versions",
            method.method.name,
            summary.phi_count,
            summary.version_count
        );
        ctx.publish(Artifact::Ssa(summary));
        Ok(())
    }
}

struct Renamer {
    version: u32,
    /// Phis of each join block, in slot order
    phis: FxHashMap<BlockId, Vec<(SlotKey, InstrId)>>,
    entered: Vec<bool>,
    phi_count: usize,
}

impl Renamer {
    fn next_version(&mut self) -> u32 {
        self.version += 1;
        self.version
    }

    fn insert_phis(&mut self, method: &mut MethodCompilation<'_>, block: BlockId, from: Option<BlockId>, live: &mut LiveSet) {
        let mut cursor = method.blocks.get(block).first;
        let mut phis = Vec::with_capacity(live.len());
        for (&key, value) in live.iter_mut() {
            let result = value.with_version(self.next_version());
            let mut phi = Instruction::ir(IrOp::Phi, vec![result.clone()], vec![value.clone()]);
            phi.phi_blocks.extend(from);
            cursor = method.instructions.insert_after(cursor, phi);
            phis.push((key, cursor));
            *value = result;
        }
        self.phi_count += phis.len();
        self.phis.insert(block, phis);
    }

    /// Append the values of a later arrival to the block's phis
    fn merge(&mut self, method: &mut MethodCompilation<'_>, arrival: &Arrival) {
        let Some(phis) = self.phis.get(&arrival.block) else {
            return;
        };
        for &(key, id) in phis {
            let Some(value) = arrival.live.get(&key) else {
                continue;
            };
            let phi = method.instructions.get_mut(id);
            if let Some(from) = arrival.from {
                if phi.phi_blocks.contains(&from) {
                    continue;
                }
                phi.phi_blocks.push(from);
            }
            phi.operands.push(value.clone());
        }
    }

    fn rename_body(&mut self, method: &mut MethodCompilation<'_>, block: BlockId, live: &mut LiveSet) -> Result<(), CompileError> {
        for id in method.blocks.instructions(&method.instructions, block) {
            if method.instructions.get(id).is_phi() {
                continue;
            }
            let instr = method.instructions.get(id).clone();
            method.track(&instr);

            let mut operands = instr.operands;
            for operand in operands.iter_mut() {
                if let Some(key) = operand.slot_key() {
                    let current = live.get(&key).ok_or_else(|| {
                        let reason = format!("read of {} before any definition", operand);
                        match instr.source_offset {
                            Some(offset) => CompileError::malformed_at(offset, instr.opcode.name(), reason),
                            None => CompileError::malformed(reason),
                        }
                    })?;
                    let version = current.version().unwrap_or_default();
                    *operand = operand.with_version(version);
                }
            }
            method.instructions.set_operands(id, operands);

            let mut results = instr.results;
            for result in results.iter_mut() {
                if let Some(key) = result.slot_key() {
                    *result = result.with_version(self.next_version());
                    live.insert(key, result.clone());
                }
            }
            method.instructions.set_results(id, results);
        }
        Ok(())
    }
}

pub struct LeaveSsaStage;

impl Stage for LeaveSsaStage {
    fn name(&self) -> &'static str {
        "leave-ssa"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::SsaDestruction)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("enter-ssa")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        if ctx.ssa().is_none() {
            log::trace!("{}: not in SSA form", method.method.name);
        }
        let mut removed = 0usize;
        for id in method.instructions.ids() {
            let instr = method.instructions.get(id);
            if instr.opcode == Opcode::Ir(IrOp::Phi) {
                let key = instr.result().and_then(Operand::slot_key);
                if let Some(stray) = instr.operands.iter().find(|o| o.slot_key() != key) {
                    return Err(CompileError::invariant(format!(
                        "phi {} takes {} from another slot",
                        instr, stray
                    )));
                }
                method.instructions.remove(id);
                removed += 1;
                continue;
            }
            let strip = |operands: &[Operand]| operands.iter().map(|o| o.with_version(0)).collect::<Vec<_>>();
            let operands = strip(&instr.operands);
            let results = strip(&instr.results);
            method.instructions.set_operands(id, operands);
            method.instructions.set_results(id, results);
        }
        log::trace!("{}: dropped {} phis", method.method.name, removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::LabelId;
    use crate::pipeline::Pipeline;
    use crate::stages::blocks::BlockDiscoveryStage;
    use crate::stages::canonicalize::CanonicalizeStage;
    use crate::stages::decode::DecodeStage;
    use crate::stages::dominance::DominanceStage;
    use kiln_bytecode::{BytecodeWriter, ElementType, MethodDef, Opcode as Bc};

    fn into_ssa(def: &MethodDef) -> MethodCompilation<'_> {
        let pipeline = Pipeline::new(vec![
            Box::new(DecodeStage),
            Box::new(BlockDiscoveryStage),
            Box::new(CanonicalizeStage),
            Box::new(DominanceStage),
            Box::new(EnterSsaStage),
        ])
        .unwrap();
        let mut method = MethodCompilation::new(def, Default::default());
        pipeline.run(&mut method).unwrap();
        method
    }

    fn phis<'a>(method: &'a MethodCompilation<'_>) -> Vec<&'a Instruction> {
        method.instructions.iter().map(|(_, i)| i).filter(|i| i.is_phi()).collect()
    }

    /// `i = 0; while (i < n) i++; return i;`
    fn counting_loop() -> MethodDef {
        let mut w = BytecodeWriter::new();
        let test = w.new_label();
        let body = w.new_label();
        w.ldc_i4(0).stloc(0);
        w.branch(Bc::Br_S, test).unwrap();
        w.mark(body);
        w.ldloc(0).ldc_i4(1).emit(Bc::Add).stloc(0);
        w.mark(test);
        w.ldloc(0).ldarg(0);
        w.branch(Bc::Blt_S, body).unwrap();
        w.ldloc(0).emit(Bc::Ret);
        MethodDef::new("Count", 1)
            .with_params(vec![ElementType::I4])
            .with_locals(vec![ElementType::I4])
            .returning(ElementType::I4)
            .with_code(w.finish().unwrap())
    }

    #[test]
    fn test_loop_header_gets_phis() {
        let def = counting_loop();
        let method = into_ssa(&def);
        let phis = phis(&method);
        // param 0 and local 0 are live around the back edge
        assert_eq!(phis.len(), 2);
        for phi in &phis {
            assert_eq!(phi.operands.len(), 2);
            assert_eq!(phi.phi_blocks.len(), 2);
            assert_ne!(phi.operands[0].version(), phi.operands[1].version());
        }

        let mut versions: Vec<u32> = method
            .instructions
            .iter()
            .flat_map(|(_, i)| i.results.iter())
            .filter_map(|r| r.version())
            .collect();
        let total = versions.len();
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), total, "versions must be unique");
    }

    #[test]
    fn test_straight_line_code_has_no_phis() {
        let def = MethodDef::new("Add", 1)
            .with_params(vec![ElementType::I4, ElementType::I4])
            .returning(ElementType::I4)
            .with_code(vec![0x02, 0x03, 0x58, 0x2A]);
        let method = into_ssa(&def);
        assert!(phis(&method).is_empty());
    }

    #[test]
    fn test_phis_only_at_the_join() {
        // if (a) x = 1; else x = 2; return x;
        let mut w = BytecodeWriter::new();
        let other = w.new_label();
        let join = w.new_label();
        w.ldarg(0);
        w.branch(Bc::Brfalse_S, other).unwrap();
        w.ldc_i4(1).stloc(0);
        w.branch(Bc::Br_S, join).unwrap();
        w.mark(other);
        w.ldc_i4(2).stloc(0);
        w.mark(join);
        w.ldloc(0).emit(Bc::Ret);
        let def = MethodDef::new("Select", 1)
            .with_params(vec![ElementType::I4])
            .with_locals(vec![ElementType::I4])
            .returning(ElementType::I4)
            .with_code(w.finish().unwrap());
        let method = into_ssa(&def);

        let join = method.blocks.by_label(LabelId::at_offset(def.code.len() - 2)).unwrap();
        let phis = phis(&method);
        // param, local and the temporary holding the condition
        assert_eq!(phis.len(), 3);
        let mut leading = 0;
        let mut cursor = method.instructions.next(method.blocks.get(join).first);
        while let Some(id) = cursor.filter(|&id| method.instructions.get(id).is_phi()) {
            leading += 1;
            cursor = method.instructions.next(id);
        }
        assert_eq!(leading, phis.len());

        let local = method.frame.local(0).unwrap().slot_key();
        let local_phi = phis.iter().find(|p| p.operands[0].slot_key() == local).unwrap();
        assert_eq!(local_phi.operands.len(), 2);
        assert_ne!(local_phi.operands[0].version(), local_phi.operands[1].version());
    }

    #[test]
    fn test_renaming_is_deterministic() {
        let def = counting_loop();
        let render = |method: &MethodCompilation<'_>| {
            method.instructions.iter().map(|(_, i)| i.to_string()).collect::<Vec<_>>()
        };
        let first = render(&into_ssa(&def));
        for _ in 0..4 {
            assert_eq!(render(&into_ssa(&def)), first);
        }
    }

    #[test]
    fn test_leave_ssa_restores_slots() {
        let def = counting_loop();
        let mut method = into_ssa(&def);
        let pipeline = Pipeline::new(vec![Box::new(LeaveSsaStage)]).unwrap();
        pipeline.run(&mut method).unwrap();
        assert!(phis(&method).is_empty());
        assert!(method
            .instructions
            .iter()
            .flat_map(|(_, i)| i.operands.iter().chain(i.results.iter()))
            .all(|o| o.version().unwrap_or(0) == 0));
    }

    #[test]
    fn test_leave_ssa_rejects_cross_slot_phi() {
        let def = counting_loop();
        let mut method = into_ssa(&def);
        let (id, _) = method.instructions.iter().find(|(_, i)| i.is_phi()).unwrap();
        let foreign = method.frame.param(0).unwrap().clone();
        let local = method.frame.local(0).unwrap().clone();
        method.instructions.set_results(id, vec![local]);
        method.instructions.set_operands(id, vec![foreign]);
        let pipeline = Pipeline::new(vec![Box::new(LeaveSsaStage)]).unwrap();
        let err = pipeline.run(&mut method).unwrap_err();
        assert!(matches!(err, CompileError::InternalInvariant(_)));
    }
}
