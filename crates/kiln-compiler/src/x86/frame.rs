//! Prologue and epilogue
//!
//! Both are inserted after lowering, once the frame size is final. The
//! prologue zeroes every slot below EBP with `rep stosd` before storing the
//! method token; EDX is saved unless it carries half of the return value.

use super::asm::{self, eax, ecx, esp, imm};
use crate::error::CompileError;
use crate::ir::{InstrId, Instruction, LabelId, Opcode, Operand, Register, ValueType, X86Op, TOKEN_OFFSET};
use crate::pipeline::MethodCompilation;

fn ebp() -> Operand {
    asm::reg(Register::EBP, ValueType::U4)
}

fn edi() -> Operand {
    asm::reg(Register::EDI, ValueType::U4)
}

pub fn prologue(size: u32, token: u32, save_edx: bool) -> Vec<Instruction> {
    let mut code = vec![
        asm::push(ebp()),
        asm::mov(ebp(), esp()),
        asm::op(X86Op::Sub, esp(), imm(i64::from(size))),
        asm::push(edi()),
        asm::mov(edi(), esp()),
        asm::push(ecx()),
        asm::op(X86Op::Add, edi(), imm(4)),
        asm::mov(ecx(), imm(i64::from(size / 4))),
        asm::op(X86Op::Xor, eax(), eax()),
        asm::plain(X86Op::RepStosd),
        asm::pop(ecx()),
        asm::pop(edi()),
        asm::mov(
            Operand::memory(Register::EBP, TOKEN_OFFSET, ValueType::U4),
            imm(i64::from(token)),
        ),
    ];
    if save_edx {
        code.push(asm::push(asm::edx()));
    }
    code
}

pub fn epilogue(size: u32, saved_edx: bool) -> Vec<Instruction> {
    let mut code = Vec::with_capacity(4);
    if saved_edx {
        code.push(asm::pop(asm::edx()));
    }
    code.push(asm::op(X86Op::Add, esp(), imm(i64::from(size))));
    code.push(asm::pop(ebp()));
    code.push(asm::plain(X86Op::Ret));
    code
}

/// EDX is free to restore unless the method returns an eight-byte integer
pub fn saves_edx(ret: Option<ValueType>) -> bool {
    !ret.is_some_and(ValueType::is_long)
}

/// Insert the prologue and epilogue after their block markers
pub fn insert_frame_code(method: &mut MethodCompilation<'_>) -> Result<(), CompileError> {
    let size = method.frame.size();
    let save_edx = saves_edx(ValueType::from_element(method.method.ret));
    let prologue = prologue(size, method.method.token, save_edx);
    let epilogue = epilogue(size, save_edx);
    for (label, code) in [(LabelId::PROLOGUE, prologue), (LabelId::EPILOGUE, epilogue)] {
        let marker = method
            .instructions
            .iter()
            .find(|(_, i)| i.opcode == Opcode::BlockStart && i.target == Some(label))
            .map(|(id, _)| id)
            .ok_or_else(|| CompileError::invariant(format!("no {} block", label)))?;
        if label == LabelId::EPILOGUE {
            drop_jump_into(method, marker);
        }
        let mut at = marker;
        for instr in code {
            at = method.instructions.insert_after(at, instr);
        }
    }
    Ok(())
}

/// Remove a `jmp epilogue` that only byte-free instructions separate from the epilogue
fn drop_jump_into(method: &mut MethodCompilation<'_>, marker: InstrId) {
    let mut cursor = method.instructions.prev(marker);
    while let Some(id) = cursor {
        let instr = method.instructions.get(id);
        let byte_free = matches!(
            instr.opcode,
            Opcode::Nop | Opcode::BlockStart | Opcode::BlockEnd | Opcode::X86(X86Op::Label)
        );
        if !method.instructions.is_ignored(id) && !byte_free {
            if instr.opcode == Opcode::X86(X86Op::Jmp) && instr.target == Some(LabelId::EPILOGUE) {
                method.instructions.remove(id);
            }
            return;
        }
        cursor = method.instructions.prev(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::MachineCodeEmitter;

    fn encode(code: &[Instruction]) -> Vec<u8> {
        let mut emitter = MachineCodeEmitter::new("F", 8);
        for instr in code {
            emitter.emit(instr).unwrap();
        }
        emitter.finish().unwrap().code
    }

    #[test]
    fn test_prologue_bytes() {
        let code = encode(&prologue(8, 0x0600_0001, true));
        let expected: Vec<u8> = [
            &[0x55][..],                          // push ebp
            &[0x8B, 0xEC],                        // mov ebp, esp
            &[0x81, 0xEC, 8, 0, 0, 0],            // sub esp, 8
            &[0x57],                              // push edi
            &[0x8B, 0xFC],                        // mov edi, esp
            &[0x51],                              // push ecx
            &[0x81, 0xC7, 4, 0, 0, 0],            // add edi, 4
            &[0xB9, 2, 0, 0, 0],                  // mov ecx, 2
            &[0x33, 0xC0],                        // xor eax, eax
            &[0xF3, 0xAB],                        // rep stosd
            &[0x59],                              // pop ecx
            &[0x5F],                              // pop edi
            &[0xC7, 0x85, 0xFC, 0xFF, 0xFF, 0xFF, 1, 0, 0, 6], // mov [ebp-4], token
            &[0x52],                              // push edx
        ]
        .concat();
        assert_eq!(code, expected);
    }

    #[test]
    fn test_epilogue_bytes() {
        assert_eq!(encode(&epilogue(4, true)), vec![0x5A, 0x81, 0xC4, 4, 0, 0, 0, 0x5D, 0xC3]);
        assert_eq!(encode(&epilogue(4, false)), vec![0x81, 0xC4, 4, 0, 0, 0, 0x5D, 0xC3]);
    }

    #[test]
    fn test_final_return_falls_into_epilogue() {
        use kiln_bytecode::MethodDef;

        let def = MethodDef::new("F", 1);
        let mut method = MethodCompilation::new(&def, Default::default());
        let set = &mut method.instructions;
        set.append(Instruction::block_start(LabelId::PROLOGUE));
        set.append(Instruction::block_start(LabelId(0)));
        set.append(asm::jcc(crate::ir::ConditionCode::Equal, LabelId(6)));
        set.append(asm::jmp(LabelId::EPILOGUE));
        set.append(Instruction::new(Opcode::BlockEnd));
        set.append(Instruction::block_start(LabelId(6)));
        set.append(asm::mov(eax(), imm(1)));
        let last = set.append(asm::jmp(LabelId::EPILOGUE));
        set.append(Instruction::new(Opcode::BlockEnd));
        set.append(Instruction::block_start(LabelId::EPILOGUE));
        insert_frame_code(&mut method).unwrap();

        assert!(method.instructions.is_ignored(last));
        let jumps = method
            .instructions
            .iter()
            .filter(|(_, i)| i.opcode == Opcode::X86(X86Op::Jmp))
            .count();
        assert_eq!(jumps, 1);
    }

    #[test]
    fn test_edx_is_kept_for_long_results() {
        assert!(saves_edx(None));
        assert!(saves_edx(Some(ValueType::I4)));
        assert!(saves_edx(Some(ValueType::R8)));
        assert!(!saves_edx(Some(ValueType::U8)));
    }
}
