//! A small IA-32 interpreter for running compiled methods in tests
//!
//! It understands exactly the encodings the emitter produces: the integer
//! core, the SSE scalar subset, port I/O and the privileged one-byte forms.
//! Calls through a `Relative32` relocation are dispatched to host closures
//! by symbol name; nothing is ever linked.

use kiln_compiler::MethodCode;
use kiln_object::LinkType;
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub const CODE_BASE: u32 = 0x1000;
pub const DATA_BASE: u32 = 0x8000;
pub const STACK_TOP: u32 = 0xF000;
const RETURN_SENTINEL: u32 = 0xFFF0;
const MEMORY_SIZE: usize = 0x10000;
const STEP_LIMIT: usize = 1_000_000;

pub const EAX: usize = 0;
pub const ECX: usize = 1;
pub const EDX: usize = 2;
pub const ESP: usize = 4;
pub const EBP: usize = 5;
pub const EDI: usize = 7;

pub type Host = Rc<dyn Fn(&mut Machine)>;

#[derive(Debug, Clone, Copy)]
enum Rm {
    Reg(usize),
    Mem(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    None,
    Rep,
    RepNe,
}

pub struct Machine {
    pub regs: [u32; 8],
    /// Low quadword of each XMM register
    pub xmm: [u64; 8],
    pub eip: u32,
    cf: bool,
    zf: bool,
    sf: bool,
    of: bool,
    pf: bool,
    pub interrupts: bool,
    pub halts: usize,
    pub breakpoints: usize,
    pub port_input: u32,
    pub port_writes: Vec<(u16, u32)>,
    pub port_reads: Vec<u16>,
    /// Model-specific registers read by `rdmsr`
    pub msrs: FxHashMap<u32, u64>,
    /// `iretd` is counted, not performed
    pub interrupt_returns: usize,
    pub memory: Vec<u8>,
    calls: FxHashMap<u32, String>,
    hosts: FxHashMap<String, Host>,
    pub called: Vec<String>,
}

impl Machine {
    /// Place `code` at [`CODE_BASE`] and resolve its self relocations
    pub fn load(code: &MethodCode) -> Machine {
        let mut machine = Machine {
            regs: [0; 8],
            xmm: [0; 8],
            eip: CODE_BASE,
            cf: false,
            zf: false,
            sf: false,
            of: false,
            pf: false,
            interrupts: true,
            halts: 0,
            breakpoints: 0,
            port_input: 0,
            port_writes: Vec::new(),
            port_reads: Vec::new(),
            msrs: FxHashMap::default(),
            interrupt_returns: 0,
            memory: vec![0; MEMORY_SIZE],
            calls: FxHashMap::default(),
            hosts: FxHashMap::default(),
            called: Vec::new(),
        };
        let base = CODE_BASE as usize;
        machine.memory[base..base + code.code.len()].copy_from_slice(&code.code);
        for reloc in &code.relocations {
            let site = CODE_BASE + reloc.offset;
            match reloc.link_type {
                LinkType::Absolute32 if reloc.symbol == code.symbol => {
                    machine.write32(site, CODE_BASE.wrapping_add(reloc.addend as u32));
                }
                LinkType::Relative32 => {
                    machine.calls.insert(site, reloc.symbol.clone());
                }
                other => panic!("cannot load {:?} relocation against {}", other, reloc.symbol),
            }
        }
        machine
    }

    /// Register a host implementation for calls to `symbol`
    ///
    /// The host sees the arguments at `[esp]` (no return address is pushed)
    /// and returns through EAX, EDX:EAX or XMM0 like compiled code does.
    pub fn host(&mut self, symbol: &str, f: impl Fn(&mut Machine) + 'static) {
        self.hosts.insert(symbol.to_string(), Rc::new(f));
    }

    /// Run the loaded method with argument words in memory order
    pub fn call(&mut self, args: &[u32]) -> Result<(), String> {
        self.regs[ESP] = STACK_TOP;
        for &word in args.iter().rev() {
            self.push(word);
        }
        self.push(RETURN_SENTINEL);
        self.eip = CODE_BASE;
        for _ in 0..STEP_LIMIT {
            if self.eip == RETURN_SENTINEL {
                if self.regs[ESP] != STACK_TOP - 4 * args.len() as u32 {
                    return Err(format!("unbalanced stack on return: esp={:#x}", self.regs[ESP]));
                }
                return Ok(());
            }
            self.step()?;
        }
        Err("step limit exceeded".to_string())
    }

    pub fn eax(&self) -> u32 {
        self.regs[EAX]
    }

    pub fn edx_eax(&self) -> u64 {
        (u64::from(self.regs[EDX]) << 32) | u64::from(self.regs[EAX])
    }

    pub fn xmm0_f32(&self) -> f32 {
        f32::from_bits(self.xmm[0] as u32)
    }

    pub fn xmm0_f64(&self) -> f64 {
        f64::from_bits(self.xmm[0])
    }

    /// Argument word `i` as seen by a host function
    pub fn arg32(&self, i: u32) -> u32 {
        self.read32(self.regs[ESP].wrapping_add(4 * i))
    }

    pub fn arg64(&self, i: u32) -> u64 {
        u64::from(self.arg32(i)) | (u64::from(self.arg32(i + 1)) << 32)
    }

    pub fn set_edx_eax(&mut self, value: u64) {
        self.regs[EAX] = value as u32;
        self.regs[EDX] = (value >> 32) as u32;
    }

    // ===== Memory =====

    fn index(&self, addr: u32, width: usize) -> usize {
        let at = addr as usize;
        assert!(at + width <= self.memory.len(), "access out of range at {:#x}", addr);
        at
    }

    pub fn read(&self, addr: u32, width: usize) -> u64 {
        let at = self.index(addr, width);
        let mut bytes = [0u8; 8];
        bytes[..width].copy_from_slice(&self.memory[at..at + width]);
        u64::from_le_bytes(bytes)
    }

    pub fn write(&mut self, addr: u32, width: usize, value: u64) {
        let at = self.index(addr, width);
        self.memory[at..at + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    pub fn read32(&self, addr: u32) -> u32 {
        self.read(addr, 4) as u32
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write(addr, 4, u64::from(value));
    }

    fn push(&mut self, value: u32) {
        self.regs[ESP] = self.regs[ESP].wrapping_sub(4);
        self.write32(self.regs[ESP], value);
    }

    fn pop(&mut self) -> u32 {
        let value = self.read32(self.regs[ESP]);
        self.regs[ESP] = self.regs[ESP].wrapping_add(4);
        value
    }

    fn fetch8(&mut self) -> u8 {
        let byte = self.read(self.eip, 1) as u8;
        self.eip += 1;
        byte
    }

    fn fetch16(&mut self) -> u16 {
        let value = self.read(self.eip, 2) as u16;
        self.eip += 2;
        value
    }

    fn fetch32(&mut self) -> u32 {
        let value = self.read32(self.eip);
        self.eip += 4;
        value
    }

    fn fetch_imm(&mut self, width: usize) -> u32 {
        match width {
            1 => u32::from(self.fetch8()),
            2 => u32::from(self.fetch16()),
            _ => self.fetch32(),
        }
    }

    // ===== Operands =====

    fn modrm(&mut self) -> (usize, Rm) {
        let byte = self.fetch8();
        let mode = byte >> 6;
        let reg = usize::from((byte >> 3) & 7);
        let rm = usize::from(byte & 7);
        if mode == 3 {
            return (reg, Rm::Reg(rm));
        }
        let mut addr = if rm == 4 {
            let sib = self.fetch8();
            let scale = sib >> 6;
            let index = usize::from((sib >> 3) & 7);
            let base = usize::from(sib & 7);
            let mut addr = if base == 5 && mode == 0 {
                self.fetch32()
            } else {
                self.regs[base]
            };
            if index != 4 {
                addr = addr.wrapping_add(self.regs[index] << scale);
            }
            addr
        } else if rm == 5 && mode == 0 {
            self.fetch32()
        } else {
            self.regs[rm]
        };
        match mode {
            1 => addr = addr.wrapping_add(self.fetch8() as i8 as u32),
            2 => addr = addr.wrapping_add(self.fetch32()),
            _ => {}
        }
        (reg, Rm::Mem(addr))
    }

    fn get_reg(&self, reg: usize, width: usize) -> u32 {
        match width {
            1 if reg < 4 => self.regs[reg] & 0xFF,
            1 => (self.regs[reg - 4] >> 8) & 0xFF,
            2 => self.regs[reg] & 0xFFFF,
            _ => self.regs[reg],
        }
    }

    fn set_reg(&mut self, reg: usize, width: usize, value: u32) {
        match width {
            1 if reg < 4 => self.regs[reg] = (self.regs[reg] & !0xFF) | (value & 0xFF),
            1 => self.regs[reg - 4] = (self.regs[reg - 4] & !0xFF00) | ((value & 0xFF) << 8),
            2 => self.regs[reg] = (self.regs[reg] & !0xFFFF) | (value & 0xFFFF),
            _ => self.regs[reg] = value,
        }
    }

    fn read_rm(&self, rm: Rm, width: usize) -> u32 {
        match rm {
            Rm::Reg(reg) => self.get_reg(reg, width),
            Rm::Mem(addr) => self.read(addr, width) as u32,
        }
    }

    fn write_rm(&mut self, rm: Rm, width: usize, value: u32) {
        match rm {
            Rm::Reg(reg) => self.set_reg(reg, width, value),
            Rm::Mem(addr) => self.write(addr, width, u64::from(value)),
        }
    }

    fn read_xmm_rm(&self, rm: Rm, width: usize) -> u64 {
        let mask = if width == 8 { u64::MAX } else { 0xFFFF_FFFF };
        match rm {
            Rm::Reg(reg) => self.xmm[reg] & mask,
            Rm::Mem(addr) => self.read(addr, width),
        }
    }

    // ===== Flags =====

    fn condition(&self, cc: u8) -> bool {
        let base = match cc >> 1 {
            0 => self.of,
            1 => self.cf,
            2 => self.zf,
            3 => self.cf || self.zf,
            4 => self.sf,
            5 => self.pf,
            6 => self.sf != self.of,
            _ => self.zf || self.sf != self.of,
        };
        base != (cc & 1 == 1)
    }

    fn set_result_flags(&mut self, result: u32, width: usize) {
        let sign = 1u32 << (width * 8 - 1);
        self.zf = result & mask(width) == 0;
        self.sf = result & sign != 0;
        self.pf = (result as u8).count_ones() % 2 == 0;
    }

    fn alu(&mut self, op: usize, a: u32, b: u32, width: usize) -> Option<u32> {
        let m = mask(width);
        let sign = 1u32 << (width * 8 - 1);
        let (a, b) = (a & m, b & m);
        let result = match op {
            0 | 2 => {
                let carry = u64::from(op == 2 && self.cf);
                let wide = u64::from(a) + u64::from(b) + carry;
                let r = (wide as u32) & m;
                self.cf = wide > u64::from(m);
                self.of = (a ^ r) & (b ^ r) & sign != 0;
                r
            }
            3 | 5 | 7 => {
                let borrow = u64::from(op == 3 && self.cf);
                let r = (u64::from(a).wrapping_sub(u64::from(b)).wrapping_sub(borrow) as u32) & m;
                self.cf = u64::from(a) < u64::from(b) + borrow;
                self.of = (a ^ b) & (a ^ r) & sign != 0;
                r
            }
            _ => {
                let r = match op {
                    1 => a | b,
                    4 => a & b,
                    _ => a ^ b,
                };
                self.cf = false;
                self.of = false;
                r
            }
        };
        self.set_result_flags(result, width);
        (op != 7).then_some(result)
    }

    fn shift(&mut self, digit: usize, rm: Rm, count: u32) -> Result<(), String> {
        let count = count & 31;
        if count == 0 {
            return Ok(());
        }
        let value = self.read_rm(rm, 4);
        let result = match digit {
            4 => {
                self.cf = (value >> (32 - count)) & 1 != 0;
                value << count
            }
            5 => {
                self.cf = (value >> (count - 1)) & 1 != 0;
                value >> count
            }
            7 => {
                self.cf = ((value as i32) >> (count - 1)) & 1 != 0;
                ((value as i32) >> count) as u32
            }
            _ => return Err(format!("unsupported shift /{}", digit)),
        };
        self.of = false;
        self.set_result_flags(result, 4);
        self.write_rm(rm, 4, result);
        Ok(())
    }

    fn float_compare(&mut self, left: u64, right: u64, width: usize) {
        let (l, r) = if width == 8 {
            (f64::from_bits(left), f64::from_bits(right))
        } else {
            (f64::from(f32::from_bits(left as u32)), f64::from(f32::from_bits(right as u32)))
        };
        let (zf, pf, cf) = match l.partial_cmp(&r) {
            None => (true, true, true),
            Some(std::cmp::Ordering::Less) => (false, false, true),
            Some(std::cmp::Ordering::Equal) => (true, false, false),
            Some(std::cmp::Ordering::Greater) => (false, false, false),
        };
        self.zf = zf;
        self.pf = pf;
        self.cf = cf;
        self.of = false;
        self.sf = false;
    }

    // ===== Execution =====

    fn step(&mut self) -> Result<(), String> {
        let start = self.eip;
        let mut op16 = false;
        let mut prefix = Prefix::None;
        let mut byte = self.fetch8();
        loop {
            match byte {
                0x66 => op16 = true,
                0xF3 => prefix = Prefix::Rep,
                0xF2 => prefix = Prefix::RepNe,
                _ => break,
            }
            byte = self.fetch8();
        }
        let width = if op16 { 2 } else { 4 };

        match byte {
            0x0F => return self.two_byte(prefix, op16, start),
            0x00..=0x3F if byte & 7 < 4 => {
                let op = usize::from(byte >> 3);
                let w = if byte & 1 == 0 { 1 } else { width };
                let (reg, rm) = self.modrm();
                let (dest_is_reg, a, b) = if byte & 2 == 0 {
                    (false, self.read_rm(rm, w), self.get_reg(reg, w))
                } else {
                    (true, self.get_reg(reg, w), self.read_rm(rm, w))
                };
                if let Some(r) = self.alu(op, a, b, w) {
                    if dest_is_reg {
                        self.set_reg(reg, w, r);
                    } else {
                        self.write_rm(rm, w, r);
                    }
                }
            }
            0x50..=0x57 => {
                let value = self.regs[usize::from(byte - 0x50)];
                self.push(value);
            }
            0x58..=0x5F => {
                let value = self.pop();
                self.regs[usize::from(byte - 0x58)] = value;
            }
            0x68 => {
                let value = self.fetch32();
                self.push(value);
            }
            0x80 | 0x81 => {
                let w = if byte == 0x80 { 1 } else { width };
                let (digit, rm) = self.modrm();
                let b = self.fetch_imm(w);
                let a = self.read_rm(rm, w);
                if let Some(r) = self.alu(digit, a, b, w) {
                    self.write_rm(rm, w, r);
                }
            }
            0x84 | 0x85 => {
                let w = if byte == 0x84 { 1 } else { width };
                let (reg, rm) = self.modrm();
                let (a, b) = (self.read_rm(rm, w), self.get_reg(reg, w));
                self.alu(4, a, b, w);
            }
            0x88 | 0x89 => {
                let w = if byte == 0x88 { 1 } else { width };
                let (reg, rm) = self.modrm();
                let value = self.get_reg(reg, w);
                self.write_rm(rm, w, value);
            }
            0x8A | 0x8B => {
                let w = if byte == 0x8A { 1 } else { width };
                let (reg, rm) = self.modrm();
                let value = self.read_rm(rm, w);
                self.set_reg(reg, w, value);
            }
            0x8F => {
                let (_, rm) = self.modrm();
                let value = self.pop();
                self.write_rm(rm, 4, value);
            }
            0x90 => {}
            0x99 => self.regs[EDX] = if (self.regs[EAX] as i32) < 0 { u32::MAX } else { 0 },
            0xAB if prefix == Prefix::Rep => {
                while self.regs[ECX] != 0 {
                    self.write32(self.regs[EDI], self.regs[EAX]);
                    self.regs[EDI] = self.regs[EDI].wrapping_add(4);
                    self.regs[ECX] -= 1;
                }
            }
            0xB8..=0xBF if !op16 => {
                let value = self.fetch32();
                self.regs[usize::from(byte - 0xB8)] = value;
            }
            0xC1 => {
                let (digit, rm) = self.modrm();
                let count = u32::from(self.fetch8());
                self.shift(digit, rm, count)?;
            }
            0xD3 => {
                let (digit, rm) = self.modrm();
                let count = self.regs[ECX] & 0xFF;
                self.shift(digit, rm, count)?;
            }
            0xC3 => self.eip = self.pop(),
            0xC6 | 0xC7 => {
                let w = if byte == 0xC6 { 1 } else { width };
                let (_, rm) = self.modrm();
                let value = self.fetch_imm(w);
                self.write_rm(rm, w, value);
            }
            0xCC => self.breakpoints += 1,
            0xCF => self.interrupt_returns += 1,
            0xE8 => {
                let site = self.eip;
                let rel = self.fetch32();
                let symbol = self
                    .calls
                    .get(&site)
                    .cloned()
                    .ok_or_else(|| format!("call at {:#x} has no relocation (rel {:#x})", start, rel))?;
                let host = self
                    .hosts
                    .get(&symbol)
                    .cloned()
                    .ok_or_else(|| format!("no host function for {}", symbol))?;
                self.called.push(symbol);
                host(self);
            }
            0xE9 => {
                let rel = self.fetch32();
                self.eip = self.eip.wrapping_add(rel);
            }
            0xEC | 0xED => {
                let w = if byte == 0xEC { 1 } else { width };
                let port = self.regs[EDX] as u16;
                self.port_reads.push(port);
                let value = self.port_input;
                self.set_reg(EAX, w, value);
            }
            0xEE | 0xEF => {
                let w = if byte == 0xEE { 1 } else { width };
                let port = self.regs[EDX] as u16;
                let value = self.get_reg(EAX, w);
                self.port_writes.push((port, value));
            }
            0xF4 => self.halts += 1,
            0xF6 | 0xF7 => {
                let w = if byte == 0xF6 { 1 } else { width };
                let (digit, rm) = self.modrm();
                self.group3(digit, rm, w)?;
            }
            0xFA => self.interrupts = false,
            0xFB => self.interrupts = true,
            0xFF => {
                let (digit, rm) = self.modrm();
                if digit != 6 {
                    return Err(format!("unsupported FF /{} at {:#x}", digit, start));
                }
                let value = self.read_rm(rm, 4);
                self.push(value);
            }
            _ => return Err(format!("unsupported opcode {:#04x} at {:#x}", byte, start)),
        }
        Ok(())
    }

    fn group3(&mut self, digit: usize, rm: Rm, width: usize) -> Result<(), String> {
        let value = self.read_rm(rm, width);
        match digit {
            0 => {
                let imm = self.fetch_imm(width);
                self.alu(4, value, imm, width);
            }
            2 => self.write_rm(rm, width, !value),
            3 => {
                let r = self.alu(5, 0, value, width).unwrap_or(0);
                self.write_rm(rm, width, r);
            }
            4 => {
                let product = u64::from(self.regs[EAX]) * u64::from(value);
                self.set_edx_eax(product);
                self.cf = self.regs[EDX] != 0;
                self.of = self.cf;
            }
            6 => {
                let dividend = self.edx_eax();
                if value == 0 || dividend / u64::from(value) > u64::from(u32::MAX) {
                    return Err("#DE in div".to_string());
                }
                self.regs[EAX] = (dividend / u64::from(value)) as u32;
                self.regs[EDX] = (dividend % u64::from(value)) as u32;
            }
            7 => {
                let dividend = self.edx_eax() as i64;
                let divisor = i64::from(value as i32);
                if divisor == 0 {
                    return Err("#DE in idiv".to_string());
                }
                let quotient = dividend / divisor;
                if i32::try_from(quotient).is_err() {
                    return Err("#DE in idiv".to_string());
                }
                self.regs[EAX] = quotient as u32;
                self.regs[EDX] = (dividend % divisor) as u32;
            }
            _ => return Err(format!("unsupported F7 /{}", digit)),
        }
        Ok(())
    }

    fn two_byte(&mut self, prefix: Prefix, op16: bool, start: u32) -> Result<(), String> {
        let byte = self.fetch8();
        let scalar = if prefix == Prefix::RepNe { 8 } else { 4 };
        match byte {
            0x32 => {
                let msr = self.regs[ECX];
                let value = self
                    .msrs
                    .get(&msr)
                    .copied()
                    .ok_or_else(|| format!("rdmsr of unknown msr {:#x} at {:#x}", msr, start))?;
                self.regs[EAX] = value as u32;
                self.regs[EDX] = (value >> 32) as u32;
            }
            0x80..=0x8F => {
                let rel = self.fetch32();
                if self.condition(byte & 0xF) {
                    self.eip = self.eip.wrapping_add(rel);
                }
            }
            0x90..=0x9F => {
                let (_, rm) = self.modrm();
                let value = u32::from(self.condition(byte & 0xF));
                self.write_rm(rm, 1, value);
            }
            0xA5 | 0xAD => {
                let (reg, rm) = self.modrm();
                let count = self.regs[ECX] & 31;
                if count != 0 {
                    let dest = self.read_rm(rm, 4);
                    let src = self.regs[reg];
                    let result = if byte == 0xA5 {
                        (dest << count) | (src >> (32 - count))
                    } else {
                        (dest >> count) | (src << (32 - count))
                    };
                    self.set_result_flags(result, 4);
                    self.write_rm(rm, 4, result);
                }
            }
            0xB6 | 0xB7 | 0xBE | 0xBF => {
                let w = if byte & 1 == 0 { 1 } else { 2 };
                let (reg, rm) = self.modrm();
                let value = self.read_rm(rm, w);
                let extended = if byte >= 0xBE {
                    let shift = 32 - 8 * w as u32;
                    (((value << shift) as i32) >> shift) as u32
                } else {
                    value
                };
                self.set_reg(reg, 4, extended);
            }
            0x10 if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                let value = self.read_xmm_rm(rm, scalar);
                self.xmm[reg] = match rm {
                    Rm::Reg(_) if scalar == 4 => (self.xmm[reg] & !0xFFFF_FFFF) | value,
                    _ => value,
                };
            }
            0x11 if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                let value = self.xmm[reg];
                match rm {
                    Rm::Mem(addr) => self.write(addr, scalar, value),
                    Rm::Reg(r) => self.xmm[r] = value,
                }
            }
            0x58 | 0x59 | 0x5C | 0x5E if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                let right = self.read_xmm_rm(rm, scalar);
                let left = self.xmm[reg];
                self.xmm[reg] = if scalar == 8 {
                    let (l, r) = (f64::from_bits(left), f64::from_bits(right));
                    let v = match byte {
                        0x58 => l + r,
                        0x59 => l * r,
                        0x5C => l - r,
                        _ => l / r,
                    };
                    v.to_bits()
                } else {
                    let (l, r) = (f32::from_bits(left as u32), f32::from_bits(right as u32));
                    let v = match byte {
                        0x58 => l + r,
                        0x59 => l * r,
                        0x5C => l - r,
                        _ => l / r,
                    };
                    (left & !0xFFFF_FFFF) | u64::from(v.to_bits())
                };
            }
            0x2E | 0x2F => {
                let w = if op16 { 8 } else { 4 };
                let (reg, rm) = self.modrm();
                let right = self.read_xmm_rm(rm, w);
                let left = self.xmm[reg];
                self.float_compare(left, right, w);
            }
            0x2A if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                let value = self.read_rm(rm, 4) as i32;
                self.xmm[reg] = if scalar == 8 {
                    f64::from(value).to_bits()
                } else {
                    (self.xmm[reg] & !0xFFFF_FFFF) | u64::from((value as f32).to_bits())
                };
            }
            0x2C if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                let bits = self.read_xmm_rm(rm, scalar);
                let value = if scalar == 8 {
                    f64::from_bits(bits)
                } else {
                    f64::from(f32::from_bits(bits as u32))
                };
                let truncated = value.trunc();
                let result = if truncated.is_nan() || truncated < -2_147_483_648.0 || truncated > 2_147_483_647.0 {
                    0x8000_0000
                } else {
                    truncated as i32 as u32
                };
                self.set_reg(reg, 4, result);
            }
            0x5A if prefix != Prefix::None => {
                let (reg, rm) = self.modrm();
                if prefix == Prefix::Rep {
                    let value = f32::from_bits(self.read_xmm_rm(rm, 4) as u32);
                    self.xmm[reg] = f64::from(value).to_bits();
                } else {
                    let value = f64::from_bits(self.read_xmm_rm(rm, 8));
                    self.xmm[reg] = (self.xmm[reg] & !0xFFFF_FFFF) | u64::from((value as f32).to_bits());
                }
            }
            _ => return Err(format!("unsupported opcode 0f {:#04x} at {:#x}", byte, start)),
        }
        Ok(())
    }
}

fn mask(width: usize) -> u32 {
    if width >= 4 {
        u32::MAX
    } else {
        (1u32 << (width * 8)) - 1
    }
}

/// Host versions of the runtime helpers compiled code calls
pub fn install_runtime(machine: &mut Machine) {
    machine.host("__kiln_ldiv", |m| {
        let (a, b) = (m.arg64(0) as i64, m.arg64(2) as i64);
        m.set_edx_eax(a.wrapping_div(b) as u64);
    });
    machine.host("__kiln_uldiv", |m| {
        let (a, b) = (m.arg64(0), m.arg64(2));
        m.set_edx_eax(a / b);
    });
    machine.host("__kiln_lrem", |m| {
        let (a, b) = (m.arg64(0) as i64, m.arg64(2) as i64);
        m.set_edx_eax(a.wrapping_rem(b) as u64);
    });
    machine.host("__kiln_ulrem", |m| {
        let (a, b) = (m.arg64(0), m.arg64(2));
        m.set_edx_eax(a % b);
    });
    machine.host("__kiln_l2d", |m| {
        let value = m.arg64(0) as i64;
        m.xmm[0] = (value as f64).to_bits();
    });
    machine.host("__kiln_ul2d", |m| {
        let value = m.arg64(0);
        m.xmm[0] = (value as f64).to_bits();
    });
    machine.host("__kiln_d2l", |m| {
        let value = f64::from_bits(m.arg64(0));
        let result = if value >= 9_223_372_036_854_775_808.0 {
            value as u64
        } else {
            value as i64 as u64
        };
        m.set_edx_eax(result);
    });
    machine.host("__kiln_fmod", |m| {
        let (a, b) = (f64::from_bits(m.arg64(0)), f64::from_bits(m.arg64(2)));
        m.xmm[0] = (a % b).to_bits();
    });
}
