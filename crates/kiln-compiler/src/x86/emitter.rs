//! Machine code emitter
//!
//! Encodes the lowered instruction list into bytes. Labels are bound as they
//! are reached; a branch to a label not yet bound records a patch that is
//! written when the label is defined. Float constants referenced through
//! [`OperandKind::Literal`] are collected into a pool after the method body
//! and addressed absolutely through a relocation against the method symbol.

use super::encoding::{self, CodeDef, Form, WidthFrom};
use crate::error::CompileError;
use crate::ir::{Instruction, LabelId, MemoryRef, Opcode, Operand, OperandKind, Register, X86Op};
use crate::pipeline::{Capability, Constraint, MethodCompilation, Stage, StageContext};
use kiln_object::{Fragment, FragmentRelocation, LinkType, SectionKind, SymbolBinding, SymbolKind};
use rustc_hash::FxHashMap;

/// Encoded method ready to be merged into the program image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCode {
    pub symbol: String,
    /// Body followed by the literal pool
    pub code: Vec<u8>,
    /// Offset of every label defined in the body
    pub labels: FxHashMap<LabelId, u32>,
    pub relocations: Vec<FragmentRelocation>,
}

impl MethodCode {
    pub fn into_fragment(self, alignment: usize) -> Fragment {
        Fragment {
            symbol: self.symbol,
            section: SectionKind::Text,
            kind: SymbolKind::Function,
            binding: SymbolBinding::Global,
            alignment,
            bytes: self.code,
            relocations: self.relocations,
        }
    }

    pub fn label(&self, label: LabelId) -> Option<u32> {
        self.labels.get(&label).copied()
    }
}

/// Site referencing a pool constant
#[derive(Debug, Clone, Copy)]
struct LiteralSite {
    position: u32,
    bits: u64,
    width: u8,
}

pub struct MachineCodeEmitter {
    symbol: String,
    literal_alignment: usize,
    code: Vec<u8>,
    labels: FxHashMap<LabelId, u32>,
    /// Displacement positions waiting for their label
    patches: FxHashMap<LabelId, Vec<u32>>,
    literals: Vec<LiteralSite>,
    relocations: Vec<FragmentRelocation>,
    backward_branches: usize,
}

impl MachineCodeEmitter {
    pub fn new(symbol: impl Into<String>, literal_alignment: usize) -> Self {
        MachineCodeEmitter {
            symbol: symbol.into(),
            literal_alignment: literal_alignment.max(1),
            code: Vec::new(),
            labels: FxHashMap::default(),
            patches: FxHashMap::default(),
            literals: Vec::new(),
            relocations: Vec::new(),
            backward_branches: 0,
        }
    }

    /// Current write position
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    /// Branches whose label was already bound when they were emitted
    pub fn backward_branches(&self) -> usize {
        self.backward_branches
    }

    /// Branch displacements still waiting for a label
    pub fn pending_patches(&self) -> usize {
        self.patches.values().map(Vec::len).sum()
    }

    /// Bind `label` to the current position and resolve branches waiting on it
    pub fn define_label(&mut self, label: LabelId) -> Result<(), CompileError> {
        let here = self.position();
        if self.labels.insert(label, here).is_some() {
            return Err(CompileError::invariant(format!("label {} defined twice", label)));
        }
        for position in self.patches.remove(&label).unwrap_or_default() {
            let rel = here as i64 - (i64::from(position) + 4);
            self.write_at(position, rel as i32);
        }
        Ok(())
    }

    pub fn emit(&mut self, instr: &Instruction) -> Result<(), CompileError> {
        match instr.opcode {
            Opcode::Nop | Opcode::BlockEnd => Ok(()),
            Opcode::BlockStart | Opcode::X86(X86Op::Label) => {
                let label = instr
                    .target
                    .ok_or_else(|| CompileError::invariant(format!("{} without a label", instr.opcode)))?;
                self.define_label(label)
            }
            Opcode::X86(op) => self.encode(op, instr),
            Opcode::Ir(op) => Err(CompileError::invariant(format!(
                "{} reached the emitter unlowered",
                op.name()
            ))),
        }
    }

    fn encode(&mut self, op: X86Op, instr: &Instruction) -> Result<(), CompileError> {
        let branch_target;
        let (dest, src) = if matches!(op, X86Op::Jmp | X86Op::Jcc) {
            let target = instr
                .target
                .ok_or_else(|| CompileError::invariant(format!("{} without a target", op.mnemonic())))?;
            branch_target = Operand::label(target);
            (Some(&branch_target), None)
        } else if instr.results.is_empty() {
            (instr.operands.first(), instr.operands.get(1))
        } else {
            (instr.results.first(), instr.operands.first())
        };

        let width = match encoding::width_operand(op) {
            WidthFrom::Dest => dest,
            WidthFrom::Src => src,
        }
        .map_or(0, |o| o.ty.width);

        let def = encoding::select(op, dest, src, width).ok_or_else(|| CompileError::UnsupportedEncoding {
            mnemonic: op.mnemonic(),
            dest: dest.map_or_else(|| "-".to_string(), |o| o.to_string()),
            src: src.map_or_else(|| "-".to_string(), |o| o.to_string()),
        })?;
        self.encode_def(def, instr, dest, src)
    }

    fn encode_def(
        &mut self,
        def: &CodeDef,
        instr: &Instruction,
        dest: Option<&Operand>,
        src: Option<&Operand>,
    ) -> Result<(), CompileError> {
        let (last, prefix) = match def.opcode.split_last() {
            Some(split) => split,
            None => return Err(CompileError::invariant("encoding without opcode bytes")),
        };
        self.code.extend_from_slice(prefix);
        let mut last = *last;
        if def.cc {
            let cc = instr
                .condition
                .ok_or_else(|| CompileError::invariant(format!("{} without a condition", instr.opcode)))?;
            last += cc.x86_code();
        }

        match def.form {
            Form::Fixed => self.code.push(last),
            Form::PlusReg => {
                let reg = register_of(dest)?;
                self.code.push(last + reg.number);
            }
            Form::Digit(digit) => {
                self.code.push(last);
                self.modrm(digit, required(dest)?)?;
            }
            Form::RegDest => {
                self.code.push(last);
                let reg = register_of(dest)?;
                self.modrm(reg.number, required(src)?)?;
            }
            Form::RegSrc => {
                self.code.push(last);
                let reg = register_of(src)?;
                self.modrm(reg.number, required(dest)?)?;
            }
            Form::Rel32 => {
                self.code.push(last);
                let target = match required(dest)?.kind {
                    OperandKind::Label(label) => label,
                    _ => return Err(CompileError::invariant("branch operand is not a label")),
                };
                self.branch_displacement(target);
            }
            Form::Call => {
                self.code.push(last);
                let symbol = match &required(dest)?.kind {
                    OperandKind::Symbol(name) => name.clone(),
                    _ => return Err(CompileError::invariant("call operand is not a symbol")),
                };
                self.relocations.push(FragmentRelocation {
                    offset: self.position(),
                    link_type: LinkType::Relative32,
                    symbol,
                    addend: -4,
                });
                self.code.extend_from_slice(&[0; 4]);
            }
        }

        if def.imm > 0 {
            let imm = [dest, src]
                .into_iter()
                .flatten()
                .find_map(Operand::bits)
                .ok_or_else(|| CompileError::invariant("immediate form without a constant"))?;
            self.code.extend_from_slice(&imm.to_le_bytes()[..usize::from(def.imm)]);
        }
        Ok(())
    }

    fn branch_displacement(&mut self, target: LabelId) {
        let position = self.position();
        match self.labels.get(&target) {
            Some(&bound) => {
                let rel = i64::from(bound) - (i64::from(position) + 4);
                self.code.extend_from_slice(&(rel as i32).to_le_bytes());
                self.backward_branches += 1;
            }
            None => {
                self.code.extend_from_slice(&[0; 4]);
                self.patches.entry(target).or_default().push(position);
            }
        }
    }

    // ===== ModR/M =====

    fn modrm(&mut self, reg: u8, rm: &Operand) -> Result<(), CompileError> {
        let reg = (reg & 7) << 3;
        match &rm.kind {
            OperandKind::Register(r) => {
                self.code.push(0xC0 | reg | r.number);
                Ok(())
            }
            OperandKind::Stack(slot) => self.memory(
                reg,
                &MemoryRef {
                    base: Some(Register::EBP),
                    index: None,
                    scale: 1,
                    displacement: slot.offset,
                },
            ),
            OperandKind::Memory(mem) => self.memory(reg, mem),
            OperandKind::Literal(bits) => {
                self.code.push(reg | 0b101);
                self.literals.push(LiteralSite {
                    position: self.position(),
                    bits: *bits,
                    width: rm.ty.width,
                });
                self.code.extend_from_slice(&[0; 4]);
                Ok(())
            }
            _ => Err(CompileError::invariant(format!("{} cannot be addressed", rm))),
        }
    }

    fn memory(&mut self, reg: u8, mem: &MemoryRef) -> Result<(), CompileError> {
        let disp = mem.displacement;
        match (mem.base, mem.index) {
            (base, Some(index)) => {
                if index == Register::ESP {
                    return Err(CompileError::invariant("esp cannot be an index register"));
                }
                let scale = match mem.scale {
                    1 => 0,
                    2 => 1,
                    4 => 2,
                    8 => 3,
                    other => return Err(CompileError::invariant(format!("invalid scale {}", other))),
                };
                let sib = |base: u8| (scale << 6) | ((index.number & 7) << 3) | base;
                match base {
                    None => {
                        self.code.extend_from_slice(&[reg | 0b100, sib(0b101)]);
                        self.code.extend_from_slice(&disp.to_le_bytes());
                    }
                    Some(base) if disp == 0 && base != Register::EBP => {
                        self.code.extend_from_slice(&[reg | 0b100, sib(base.number)]);
                    }
                    Some(base) => {
                        self.code.extend_from_slice(&[0x80 | reg | 0b100, sib(base.number)]);
                        self.code.extend_from_slice(&disp.to_le_bytes());
                    }
                }
            }
            (None, None) => {
                self.code.push(reg | 0b101);
                self.code.extend_from_slice(&disp.to_le_bytes());
            }
            (Some(base), None) if base == Register::ESP => {
                if disp == 0 {
                    self.code.extend_from_slice(&[reg | 0b100, 0x24]);
                } else {
                    self.code.extend_from_slice(&[0x80 | reg | 0b100, 0x24]);
                    self.code.extend_from_slice(&disp.to_le_bytes());
                }
            }
            (Some(base), None) if disp == 0 && base != Register::EBP => {
                self.code.push(reg | base.number);
            }
            (Some(base), None) => {
                self.code.push(0x80 | reg | base.number);
                self.code.extend_from_slice(&disp.to_le_bytes());
            }
        }
        Ok(())
    }

    fn write_at(&mut self, position: u32, value: i32) {
        let at = position as usize;
        self.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Finalization =====

    /// Check patches, append the literal pool and hand out the code
    pub fn finish(mut self) -> Result<MethodCode, CompileError> {
        if !self.patches.is_empty() {
            let mut missing: Vec<String> = self.patches.keys().map(|l| l.to_string()).collect();
            missing.sort();
            return Err(CompileError::invariant(format!(
                "branches to undefined labels: {}",
                missing.join(", ")
            )));
        }

        if !self.literals.is_empty() {
            let padding = (self.literal_alignment - self.code.len() % self.literal_alignment) % self.literal_alignment;
            self.code.resize(self.code.len() + padding, 0);
        }

        let mut pool: FxHashMap<(u64, u8), u32> = FxHashMap::default();
        let sites = std::mem::take(&mut self.literals);
        for site in sites {
            let offset = match pool.get(&(site.bits, site.width)) {
                Some(&offset) => offset,
                None => {
                    let width = usize::from(site.width.max(4));
                    let padding = (width - self.code.len() % width) % width;
                    self.code.resize(self.code.len() + padding, 0);
                    let offset = self.position();
                    self.code.extend_from_slice(&site.bits.to_le_bytes()[..width]);
                    pool.insert((site.bits, site.width), offset);
                    offset
                }
            };
            self.write_at(site.position, offset as i32);
            self.relocations.push(FragmentRelocation {
                offset: site.position,
                link_type: LinkType::Absolute32,
                symbol: self.symbol.clone(),
                addend: offset as i32,
            });
        }

        Ok(MethodCode {
            symbol: self.symbol,
            code: self.code,
            labels: self.labels,
            relocations: self.relocations,
        })
    }
}

fn required(operand: Option<&Operand>) -> Result<&Operand, CompileError> {
    operand.ok_or_else(|| CompileError::invariant("missing operand"))
}

fn register_of(operand: Option<&Operand>) -> Result<Register, CompileError> {
    required(operand)?
        .as_register()
        .ok_or_else(|| CompileError::invariant("operand is not a register"))
}

// ===== Stage =====

/// Encodes the lowered method
pub struct EmitStage;

impl Stage for EmitStage {
    fn name(&self) -> &'static str {
        "emit"
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Emission)
    }

    fn constraints(&self) -> Vec<Constraint> {
        vec![Constraint::After("lowering")]
    }

    fn run(&self, method: &mut MethodCompilation<'_>, _ctx: &mut StageContext<'_>) -> Result<(), CompileError> {
        let mut emitter = MachineCodeEmitter::new(method.method.name.clone(), method.options.literal_alignment);
        let mut failed = None;
        for (_, instr) in method.instructions.iter() {
            if let Err(err) = emitter.emit(instr) {
                failed = Some((instr.clone(), err));
                break;
            }
        }
        if let Some((instr, err)) = failed {
            method.track(&instr);
            return Err(err);
        }

        let backward = emitter.backward_branches();
        let code = emitter.finish()?;
        log::debug!(
            "{}: emitted {} bytes, {} relocations, {} backward branches",
            method.method.name,
            code.code.len(),
            code.relocations.len(),
            backward
        );
        method.code = Some(code);
        Ok(())
    }
}
