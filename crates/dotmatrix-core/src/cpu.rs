use crate::{error::EmuError, interrupts::Interrupt, mmu::Mmu};

// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
const FLAG_Z: u8 = 0x80; // Zero
const FLAG_N: u8 = 0x40; // Subtract
const FLAG_H: u8 = 0x20; // Half Carry
const FLAG_C: u8 = 0x10; // Carry

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;

const DMG_BOOT_A: u8 = 0x01;
const DMG_BOOT_F: u8 = 0xB0;
const DMG_BOOT_B: u8 = 0x00;
const DMG_BOOT_C: u8 = 0x13;
const DMG_BOOT_D: u8 = 0x00;
const DMG_BOOT_E: u8 = 0xD8;
const DMG_BOOT_H: u8 = 0x01;
const DMG_BOOT_L: u8 = 0x4D;

const CGB_BOOT_A: u8 = 0x11;
const CGB_BOOT_F: u8 = 0x80;
const CGB_BOOT_B: u8 = 0x00;
const CGB_BOOT_C: u8 = 0x00;
const CGB_BOOT_D: u8 = 0x00;
const CGB_BOOT_E: u8 = 0x08;
const CGB_BOOT_H: u8 = 0x00;
const CGB_BOOT_L: u8 = 0x7C;

pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    /// Total M-cycles executed.
    pub cycles: u64,
    pub ime: bool,
    pub halted: bool,
    halt_bug: bool,
    /// Set by EI; IME turns on after the following instruction.
    ime_pending: bool,
    step_cycles: u8,
}

impl Cpu {
    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    /// Create a CPU with cleared registers, for executing a boot ROM from
    /// address 0x0000.
    pub fn new_power_on() -> Self {
        Self {
            a: 0,
            f: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            pc: 0x0000,
            sp: 0x0000,
            cycles: 0,
            ime: false,
            halted: false,
            halt_bug: false,
            ime_pending: false,
            step_cycles: 0,
        }
    }

    /// Create a CPU initialized to the post-boot register state for the
    /// selected hardware mode.
    pub fn new_with_mode(cgb: bool) -> Self {
        let mut cpu = Self::new_power_on();
        if cgb {
            cpu.a = CGB_BOOT_A;
            cpu.f = CGB_BOOT_F;
            cpu.b = CGB_BOOT_B;
            cpu.c = CGB_BOOT_C;
            cpu.d = CGB_BOOT_D;
            cpu.e = CGB_BOOT_E;
            cpu.h = CGB_BOOT_H;
            cpu.l = CGB_BOOT_L;
        } else {
            cpu.a = DMG_BOOT_A;
            cpu.f = DMG_BOOT_F;
            cpu.b = DMG_BOOT_B;
            cpu.c = DMG_BOOT_C;
            cpu.d = DMG_BOOT_D;
            cpu.e = DMG_BOOT_E;
            cpu.h = DMG_BOOT_H;
            cpu.l = DMG_BOOT_L;
        }
        cpu.pc = BOOT_PC;
        cpu.sp = BOOT_SP;
        cpu
    }

    pub fn get_af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f & 0xF0) as u16
    }

    fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = (val as u8) & 0xF0;
    }

    pub fn get_bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn get_de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn get_hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    /// 16-bit register pair by opcode index: BC, DE, HL, SP.
    fn get_rr(&self, index: u8) -> u16 {
        match index {
            0 => self.get_bc(),
            1 => self.get_de(),
            2 => self.get_hl(),
            _ => self.sp,
        }
    }

    fn set_rr(&mut self, index: u8, val: u16) {
        match index {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CY:{}",
            self.get_af(),
            self.get_bc(),
            self.get_de(),
            self.get_hl(),
            self.pc,
            self.sp,
            self.cycles
        )
    }

    /// Internal delay with no bus access.
    #[inline]
    fn idle(&mut self) {
        self.step_cycles += 1;
    }

    fn read8(&mut self, mmu: &mut Mmu, addr: u16) -> u8 {
        self.step_cycles += 1;
        mmu.read_byte(addr)
    }

    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        self.step_cycles += 1;
        mmu.write_byte(addr, val);
    }

    fn fetch8(&mut self, mmu: &mut Mmu) -> u8 {
        let val = self.read8(mmu, self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    fn fetch16(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn read_reg(&mut self, mmu: &mut Mmu, index: u8) -> u8 {
        match index {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(mmu, self.get_hl()),
            _ => self.a,
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, val);
            }
            _ => self.a = val,
        }
    }

    /// Branch condition by opcode index: NZ, Z, NC, C.
    fn condition(&self, cc: u8) -> bool {
        match cc {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_add(1);
        self.f = (self.f & FLAG_C)
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
        res
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let res = val.wrapping_sub(1);
        self.f = (self.f & FLAG_C)
            | FLAG_N
            | if res == 0 { FLAG_Z } else { 0 }
            | if val & 0x0F == 0 { FLAG_H } else { 0 };
        res
    }

    /// ADD, ADC, SUB, SBC, AND, XOR, OR or CP against A.
    fn alu(&mut self, op: u8, val: u8) {
        let carry_in = if self.f & FLAG_C != 0 { 1 } else { 0 };
        match op {
            0 | 1 => {
                let carry_in = if op == 1 { carry_in } else { 0 };
                let res = self.a as u16 + val as u16 + carry_in as u16;
                self.f = if res as u8 == 0 { FLAG_Z } else { 0 }
                    | if (self.a & 0x0F) + (val & 0x0F) + carry_in > 0x0F {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res > 0xFF { FLAG_C } else { 0 };
                self.a = res as u8;
            }
            2 | 3 | 7 => {
                let carry_in = if op == 3 { carry_in } else { 0 };
                let res = (self.a as i16) - (val as i16) - (carry_in as i16);
                self.f = FLAG_N
                    | if res as u8 == 0 { FLAG_Z } else { 0 }
                    | if (self.a & 0x0F) < (val & 0x0F) + carry_in {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res < 0 { FLAG_C } else { 0 };
                if op != 7 {
                    self.a = res as u8;
                }
            }
            4 => {
                self.a &= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
            }
            5 => {
                self.a ^= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            _ => {
                self.a |= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
        }
    }

    fn add_hl(&mut self, val: u16) {
        let hl = self.get_hl();
        let res = hl.wrapping_add(val);
        self.f = (self.f & FLAG_Z)
            | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                FLAG_H
            } else {
                0
            }
            | if (hl as u32 + val as u32) > 0xFFFF {
                FLAG_C
            } else {
                0
            };
        self.set_hl(res);
        self.idle();
    }

    /// SP plus a signed immediate, with the flags ADD SP,e and LD HL,SP+e share.
    fn sp_plus_offset(&mut self, mmu: &mut Mmu) -> u16 {
        let val = self.fetch8(mmu) as i8 as i16 as u16;
        let sp = self.sp;
        self.f = if (sp & 0x0F) + (val & 0x0F) > 0x0F {
            FLAG_H
        } else {
            0
        } | if (sp & 0xFF) + (val & 0xFF) > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(val)
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        if self.f & FLAG_H != 0 || (self.f & FLAG_N == 0 && (self.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if self.f & FLAG_C != 0 || (self.f & FLAG_N == 0 && self.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        if self.f & FLAG_N == 0 {
            self.a = self.a.wrapping_add(correction);
        } else {
            self.a = self.a.wrapping_sub(correction);
        }
        self.f = if self.a == 0 { FLAG_Z } else { 0 }
            | (self.f & FLAG_N)
            | if carry { FLAG_C } else { 0 };
    }

    fn handle_cb(&mut self, mmu: &mut Mmu) {
        let opcode = self.fetch8(mmu);
        let r = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        let val = self.read_reg(mmu, r);
        match opcode {
            0x00..=0x3F => {
                let carry_in = self.f & FLAG_C != 0;
                let (res, carry_out) = match bit {
                    0 => (val.rotate_left(1), val & 0x80 != 0),
                    1 => (val.rotate_right(1), val & 0x01 != 0),
                    2 => ((val << 1) | carry_in as u8, val & 0x80 != 0),
                    3 => ((val >> 1) | ((carry_in as u8) << 7), val & 0x01 != 0),
                    4 => (val << 1, val & 0x80 != 0),
                    5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
                    6 => (val.rotate_left(4), false),
                    _ => (val >> 1, val & 0x01 != 0),
                };
                self.write_reg(mmu, r, res);
                self.f = if res == 0 { FLAG_Z } else { 0 } | if carry_out { FLAG_C } else { 0 };
            }
            0x40..=0x7F => {
                // BIT only reads; (HL) costs 3 M-cycles.
                self.f =
                    (self.f & FLAG_C) | FLAG_H | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            0x80..=0xBF => self.write_reg(mmu, r, val & !(1 << bit)),
            _ => self.write_reg(mmu, r, val | (1 << bit)),
        }
    }

    fn dispatch_interrupt(&mut self, mmu: &mut Mmu, irq: Interrupt) {
        self.ime = false;
        self.halted = false;
        mmu.interrupts.clear(irq);
        self.idle();
        self.idle();
        let pc = self.pc;
        self.push_stack(mmu, pc);
        self.pc = irq.vector();
        self.idle();
    }

    /// Execute one instruction, or service one interrupt, and return the
    /// M-cycles it took.
    pub fn step(&mut self, mmu: &mut Mmu) -> Result<u8, EmuError> {
        self.step_cycles = 0;
        let result = self.execute(mmu);
        self.cycles += self.step_cycles as u64;
        result.map(|()| self.step_cycles)
    }

    fn execute(&mut self, mmu: &mut Mmu) -> Result<(), EmuError> {
        let pending = mmu.interrupts.pending();
        if self.ime
            && let Some(irq) = pending
        {
            self.dispatch_interrupt(mmu, irq);
            return Ok(());
        }

        if self.ime_pending {
            self.ime_pending = false;
            self.ime = true;
        }

        if self.halted {
            if pending.is_none() {
                self.idle();
                return Ok(());
            }
            self.halted = false;
        }

        #[cfg(feature = "cpu-trace")]
        log::trace!(target: "dotmatrix_core::cpu", "{}", self.debug_state());

        let opcode_pc = self.pc;
        let opcode = self.fetch8(mmu);
        if self.halt_bug {
            // The byte after HALT is read twice.
            self.halt_bug = false;
            self.pc = self.pc.wrapping_sub(1);
        }

        match opcode {
            0x00 => {}
            0x10 => {
                // STOP carries a padding byte.
                self.pc = self.pc.wrapping_add(1);
            }
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.set_rr(opcode >> 4, val);
            }
            0x02 => {
                let addr = self.get_bc();
                self.write8(mmu, addr, self.a);
            }
            0x12 => {
                let addr = self.get_de();
                self.write8(mmu, addr, self.a);
            }
            0x22 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_add(1));
            }
            0x32 => {
                let addr = self.get_hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x0A => {
                let addr = self.get_bc();
                self.a = self.read8(mmu, addr);
            }
            0x1A => {
                let addr = self.get_de();
                self.a = self.read8(mmu, addr);
            }
            0x2A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_add(1));
            }
            0x3A => {
                let addr = self.get_hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(addr.wrapping_sub(1));
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let index = opcode >> 4;
                let val = self.get_rr(index).wrapping_add(1);
                self.set_rr(index, val);
                self.idle();
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let index = opcode >> 4;
                let val = self.get_rr(index).wrapping_sub(1);
                self.set_rr(index, val);
                self.idle();
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let val = self.get_rr(opcode >> 4);
                self.add_hl(val);
            }
            0x00..=0x3F if opcode & 0x07 == 0x04 => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.inc8(val);
                self.write_reg(mmu, r, res);
            }
            0x00..=0x3F if opcode & 0x07 == 0x05 => {
                let r = opcode >> 3;
                let val = self.read_reg(mmu, r);
                let res = self.dec8(val);
                self.write_reg(mmu, r, res);
            }
            0x00..=0x3F if opcode & 0x07 == 0x06 => {
                let val = self.fetch8(mmu);
                self.write_reg(mmu, opcode >> 3, val);
            }
            0x07 => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x0F => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x17 => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | (self.f & FLAG_C != 0) as u8;
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x1F => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | (((self.f & FLAG_C != 0) as u8) << 7);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, (self.sp & 0xFF) as u8);
                self.write8(mmu, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x18 => {
                let offset = self.fetch8(mmu) as i8;
                self.idle();
                self.pc = self.pc.wrapping_add(offset as i16 as u16);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(mmu) as i8;
                if self.condition((opcode >> 3) & 0x03) {
                    self.idle();
                    self.pc = self.pc.wrapping_add(offset as i16 as u16);
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.a = !self.a;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            0x37 => self.f = (self.f & FLAG_Z) | FLAG_C,
            0x3F => self.f = (self.f & FLAG_Z) | ((self.f & FLAG_C) ^ FLAG_C),
            0x76 => {
                if !self.ime && mmu.interrupts.pending().is_some() {
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
            }
            0x40..=0x7F => {
                let val = self.read_reg(mmu, opcode & 0x07);
                self.write_reg(mmu, (opcode >> 3) & 0x07, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, opcode & 0x07);
                self.alu((opcode >> 3) & 0x07, val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(mmu);
                self.alu((opcode >> 3) & 0x07, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.idle();
                if self.condition((opcode >> 3) & 0x03) {
                    self.pc = self.pop_stack(mmu);
                    self.idle();
                }
            }
            0xC9 => {
                self.pc = self.pop_stack(mmu);
                self.idle();
            }
            0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.idle();
                self.ime = true;
            }
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let val = self.pop_stack(mmu);
                match (opcode >> 4) & 0x03 {
                    3 => self.set_af(val),
                    index => self.set_rr(index, val),
                }
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let val = match (opcode >> 4) & 0x03 {
                    3 => self.get_af(),
                    index => self.get_rr(index),
                };
                self.idle();
                self.push_stack(mmu, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition((opcode >> 3) & 0x03) {
                    self.idle();
                    self.pc = addr;
                }
            }
            0xC3 => {
                let addr = self.fetch16(mmu);
                self.idle();
                self.pc = addr;
            }
            0xE9 => self.pc = self.get_hl(),
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition((opcode >> 3) & 0x03) {
                    self.idle();
                    let ret = self.pc;
                    self.push_stack(mmu, ret);
                    self.pc = addr;
                }
            }
            0xCD => {
                let addr = self.fetch16(mmu);
                self.idle();
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = addr;
            }
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.idle();
                let ret = self.pc;
                self.push_stack(mmu, ret);
                self.pc = (opcode & 0x38) as u16;
            }
            0xCB => self.handle_cb(mmu),
            0xE0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.write8(mmu, addr, self.a);
            }
            0xF0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.a = self.read8(mmu, addr);
            }
            0xE2 => {
                let addr = 0xFF00 | self.c as u16;
                self.write8(mmu, addr, self.a);
            }
            0xF2 => {
                let addr = 0xFF00 | self.c as u16;
                self.a = self.read8(mmu, addr);
            }
            0xEA => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = self.read8(mmu, addr);
            }
            0xE8 => {
                self.sp = self.sp_plus_offset(mmu);
                self.idle();
                self.idle();
            }
            0xF8 => {
                let val = self.sp_plus_offset(mmu);
                self.set_hl(val);
                self.idle();
            }
            0xF9 => {
                self.sp = self.get_hl();
                self.idle();
            }
            0xF3 => {
                self.ime = false;
                self.ime_pending = false;
            }
            0xFB => self.ime_pending = true,
            // D3 DB DD E3 E4 EB EC ED F4 FC FD
            _ => {
                return Err(EmuError::IllegalOpcode {
                    opcode,
                    pc: opcode_pc,
                });
            }
        }
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
