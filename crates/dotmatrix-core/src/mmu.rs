use std::ops::RangeInclusive;

use crate::{
    apu::Apu,
    cartridge::Cartridge,
    diagnostics::{Diagnostic, DiagnosticSink, Level, LogSink},
    error::EmuError,
    interrupts::{Interrupt, InterruptFlags},
    joypad::{Button, Joypad},
    ppu::Ppu,
    timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;
const BOOT_ROM_SIZE: usize = 0x100;
const OAM_DMA_LEN: u16 = 0x100;
/// M-cycles between an FF46 write and the OAM copy.
const OAM_DMA_CYCLES: u16 = 160;
const LOG_TARGET: &str = "dotmatrix_core::mmu";

/// Register-level access for components that own memory-mapped I/O.
///
/// Reads take `&self`: polling a register never changes emulated state.
pub trait IoRegisters {
    fn read_register(&self, addr: u16) -> u8;
    fn write_register(&mut self, addr: u16, val: u8);
}

/// Component that answers for an I/O register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOwner {
    Joypad,
    Timer,
    Interrupts,
    Apu,
    Ppu,
    OamDma,
    BootRom,
    VramDma,
    VramBank,
    WramBank,
}

/// Where an address lands after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    BootRom,
    CartRom,
    Vram,
    CartRam,
    Wram0,
    WramBanked,
    /// FE00-FEFF. Only the first 0xA0 bytes hold object entries.
    Oam,
    Io(IoOwner),
    Hram,
}

/// Transfer mode for CGB DMA operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaMode {
    /// General DMA (immediate)
    Gdma,
    /// HBlank DMA
    Hdma,
}

#[derive(Debug)]
struct HdmaState {
    /// 16-bit source pointer (upper 12 bits writable)
    src: u16,
    /// Destination in VRAM (0x8000 | (dst & 0x1FF0))
    dst: u16,
    /// Remaining 0x10-byte blocks
    blocks: u8,
    mode: DmaMode,
    active: bool,
    /// Whether the previous transfer was explicitly cancelled
    cancelled: bool,
}

#[derive(Debug, Default)]
struct OamDma {
    /// Last value written to FF46
    source: u8,
    /// M-cycles left before the copy happens
    remaining: u16,
}

pub struct Mmu {
    pub wram: [[u8; WRAM_BANK_SIZE]; 8],
    pub wram_bank: usize,
    pub hram: [u8; 0x7F],
    pub cart: Option<Cartridge>,
    pub boot_rom: Option<Vec<u8>>,
    pub boot_mapped: bool,
    pub interrupts: InterruptFlags,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub joypad: Joypad,
    io_map: [Option<IoOwner>; 0x80],
    hdma: HdmaState,
    oam_dma: OamDma,
    sink: Box<dyn DiagnosticSink>,
}

impl Mmu {
    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    /// Memory map in the state the boot ROM leaves behind.
    pub fn new_with_mode(cgb: bool) -> Self {
        let mut mmu = Self::new_power_on(cgb);
        mmu.ppu.apply_boot_state();
        mmu.apu.apply_boot_state();
        mmu.interrupts.raised = 0xE1;
        mmu.timer.div = 0xABCC;
        mmu
    }

    /// Memory map at power-on, for running a boot ROM.
    pub fn new_power_on(cgb: bool) -> Self {
        let mut mmu = Self {
            wram: [[0; WRAM_BANK_SIZE]; 8],
            wram_bank: 1,
            hram: [0; 0x7F],
            cart: None,
            boot_rom: None,
            boot_mapped: false,
            interrupts: InterruptFlags::new(),
            ppu: Ppu::new_with_mode(cgb),
            apu: Apu::new(),
            timer: Timer::new(),
            joypad: Joypad::new(),
            io_map: [None; 0x80],
            hdma: HdmaState {
                src: 0,
                dst: Self::sanitize_vram_dma_dest(0),
                blocks: 0,
                mode: DmaMode::Gdma,
                active: false,
                cancelled: false,
            },
            oam_dma: OamDma::default(),
            sink: Box::new(LogSink),
        };
        mmu.register(0xFF00..=0xFF00, IoOwner::Joypad);
        mmu.register(0xFF04..=0xFF07, IoOwner::Timer);
        mmu.register(0xFF0F..=0xFF0F, IoOwner::Interrupts);
        mmu.register(0xFF10..=0xFF3F, IoOwner::Apu);
        mmu.register(0xFF40..=0xFF45, IoOwner::Ppu);
        mmu.register(0xFF46..=0xFF46, IoOwner::OamDma);
        mmu.register(0xFF47..=0xFF4B, IoOwner::Ppu);
        mmu.register(0xFF50..=0xFF50, IoOwner::BootRom);
        if cgb {
            mmu.register(0xFF4F..=0xFF4F, IoOwner::VramBank);
            mmu.register(0xFF51..=0xFF55, IoOwner::VramDma);
            mmu.register(0xFF68..=0xFF6B, IoOwner::Ppu);
            mmu.register(0xFF70..=0xFF70, IoOwner::WramBank);
        }
        mmu
    }

    /// Route an I/O register range to its owner.
    fn register(&mut self, range: RangeInclusive<u16>, owner: IoOwner) {
        for addr in range {
            if let Some(slot) = self.io_map.get_mut((addr - 0xFF00) as usize) {
                *slot = Some(owner);
            }
        }
    }

    /// Replace the sink that receives bus diagnostics.
    pub fn set_diagnostic_sink(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.sink = sink;
    }

    /// Hand back the installed sink, leaving the default `LogSink` behind.
    pub fn take_diagnostic_sink(&mut self) -> Box<dyn DiagnosticSink> {
        std::mem::replace(&mut self.sink, Box::new(LogSink))
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Map a boot ROM over 0x0000-0x00FF until FF50 is written.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) -> Result<(), EmuError> {
        if data.len() != BOOT_ROM_SIZE {
            return Err(EmuError::InvalidBootRom { len: data.len() });
        }
        self.boot_rom = Some(data);
        self.boot_mapped = true;
        Ok(())
    }

    /// Decode an address into its region and the offset inside it.
    /// `None` means nothing answers at that address.
    pub fn resolve(&self, addr: u16) -> Option<(Region, usize)> {
        let resolved = match addr {
            0x0000..=0x00FF if self.boot_mapped => (Region::BootRom, addr as usize),
            0x0000..=0x7FFF => {
                self.cart.as_ref()?;
                (Region::CartRom, addr as usize)
            }
            0x8000..=0x9FFF => (Region::Vram, (addr - 0x8000) as usize),
            0xA000..=0xBFFF => {
                self.cart.as_ref()?;
                (Region::CartRam, addr as usize)
            }
            0xC000..=0xCFFF => (Region::Wram0, (addr - 0xC000) as usize),
            0xD000..=0xDFFF => (Region::WramBanked, (addr - 0xD000) as usize),
            0xE000..=0xEFFF => (Region::Wram0, (addr - 0xE000) as usize),
            0xF000..=0xFDFF => (Region::WramBanked, (addr - 0xF000) as usize),
            0xFE00..=0xFEFF => (Region::Oam, (addr - 0xFE00) as usize),
            0xFF00..=0xFF7F => {
                let owner = self.io_map[(addr - 0xFF00) as usize]?;
                (Region::Io(owner), addr as usize)
            }
            0xFF80..=0xFFFE => (Region::Hram, (addr - 0xFF80) as usize),
            0xFFFF => (Region::Io(IoOwner::Interrupts), addr as usize),
        };
        Some(resolved)
    }

    fn report(&mut self, message: String) {
        self.sink.report(Diagnostic {
            level: Level::Warn,
            target: LOG_TARGET,
            message,
        });
    }

    pub fn read_byte(&mut self, addr: u16) -> u8 {
        let Some((region, offset)) = self.resolve(addr) else {
            self.report(format!("read from unmapped address {addr:#06X}"));
            return 0xFF;
        };
        match region {
            Region::BootRom => self
                .boot_rom
                .as_ref()
                .and_then(|b| b.get(offset).copied())
                .unwrap_or(0xFF),
            Region::CartRom | Region::CartRam => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            Region::Vram => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[self.ppu.vram_bank][offset]
                } else {
                    0xFF
                }
            }
            Region::Wram0 => self.wram[0][offset],
            Region::WramBanked => self.wram[self.wram_bank][offset],
            Region::Oam => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[offset]
                } else {
                    0xFF
                }
            }
            Region::Io(owner) => self.read_io(owner, addr),
            Region::Hram => self.hram[offset],
        }
    }

    fn read_io(&self, owner: IoOwner, addr: u16) -> u8 {
        match owner {
            IoOwner::Joypad => self.joypad.read_register(addr),
            IoOwner::Timer => self.timer.read_register(addr),
            IoOwner::Interrupts => self.interrupts.read_register(addr),
            IoOwner::Apu => self.apu.read_register(addr),
            IoOwner::Ppu => self.ppu.read_register(addr),
            IoOwner::OamDma => self.oam_dma.source,
            IoOwner::BootRom => {
                if self.boot_mapped {
                    0xFE
                } else {
                    0xFF
                }
            }
            IoOwner::VramDma => self.read_vram_dma(addr),
            IoOwner::VramBank => 0xFE | self.ppu.vram_bank as u8,
            IoOwner::WramBank => 0xF8 | self.wram_bank as u8,
        }
    }

    fn read_vram_dma(&self, addr: u16) -> u8 {
        match addr {
            0xFF51 => (self.hdma.src >> 8) as u8,
            0xFF52 => (self.hdma.src & 0x00F0) as u8,
            0xFF53 => ((self.hdma.dst & 0x1F00) >> 8) as u8,
            0xFF54 => (self.hdma.dst & 0x00F0) as u8,
            0xFF55 => {
                if self.hdma.active {
                    // Busy flag (bit 7) is cleared while the DMA is running.
                    self.hdma.blocks.saturating_sub(1) & 0x7F
                } else if self.hdma.cancelled {
                    0x80
                } else {
                    0xFF
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        let Some((region, offset)) = self.resolve(addr) else {
            self.report(format!(
                "write of {val:#04X} to unmapped address {addr:#06X}"
            ));
            return;
        };
        match region {
            // The boot ROM only shadows reads; writes reach the cartridge.
            Region::BootRom | Region::CartRom | Region::CartRam => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            Region::Vram => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[self.ppu.vram_bank][offset] = val;
                }
            }
            Region::Wram0 => self.wram[0][offset] = val,
            Region::WramBanked => self.wram[self.wram_bank][offset] = val,
            Region::Oam => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[offset] = val;
                }
            }
            Region::Io(owner) => self.write_io(owner, addr, val),
            Region::Hram => self.hram[offset] = val,
        }
    }

    fn write_io(&mut self, owner: IoOwner, addr: u16, val: u8) {
        match owner {
            IoOwner::Joypad => self.joypad.write_register(addr, val),
            IoOwner::Timer => self.timer.write_register(addr, val),
            IoOwner::Interrupts => self.interrupts.write_register(addr, val),
            IoOwner::Apu => self.apu.write_register(addr, val),
            IoOwner::Ppu => {
                let lcd_was_on = self.ppu.lcd_enabled();
                self.ppu.write_register(addr, val);
                let lcd_on = self.ppu.lcd_enabled();
                if lcd_was_on && !lcd_on {
                    self.interrupts.clear(Interrupt::VBlank);
                    self.interrupts.clear(Interrupt::Stat);
                    self.complete_active_hdma();
                } else if !lcd_was_on && lcd_on {
                    self.ppu.lcd_on(&mut self.interrupts);
                }
            }
            IoOwner::OamDma => {
                self.oam_dma.source = val;
                self.oam_dma.remaining = OAM_DMA_CYCLES;
            }
            IoOwner::BootRom => self.boot_mapped = false,
            IoOwner::VramDma => self.write_vram_dma(addr, val),
            IoOwner::VramBank => self.ppu.vram_bank = (val & 0x01) as usize,
            IoOwner::WramBank => {
                let bank = (val & 0x07) as usize;
                self.wram_bank = if bank == 0 { 1 } else { bank };
            }
        }
    }

    fn write_vram_dma(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF51 if !self.hdma.active => {
                self.hdma.src = (val as u16) << 8 | (self.hdma.src & 0x00FF);
            }
            0xFF52 if !self.hdma.active => {
                self.hdma.src = (self.hdma.src & 0xFF00) | (val & 0xF0) as u16;
            }
            0xFF53 if !self.hdma.active => {
                let raw = ((val as u16 & 0x1F) << 8) | (self.hdma.dst & 0x00F0);
                self.hdma.dst = Self::sanitize_vram_dma_dest(raw);
            }
            0xFF54 if !self.hdma.active => {
                let raw = (self.hdma.dst & 0x1F00) | (val as u16 & 0x00F0);
                self.hdma.dst = Self::sanitize_vram_dma_dest(raw);
            }
            0xFF55 => {
                let requested_blocks = (val & 0x7F) + 1;
                if self.hdma.active && val & 0x80 == 0 {
                    self.hdma.active = false;
                    self.hdma.blocks = 0;
                    self.hdma.cancelled = true;
                } else if val & 0x80 == 0 {
                    self.start_gdma(requested_blocks);
                } else {
                    self.hdma.mode = DmaMode::Hdma;
                    self.hdma.blocks = requested_blocks;
                    self.hdma.active = true;
                    self.hdma.cancelled = false;
                    if !self.ppu.lcd_enabled() || self.ppu.in_hblank() {
                        self.hdma_hblank_transfer();
                    }
                }
            }
            _ => {}
        }
    }

    /// Press or release a button, raising the joypad interrupt on a new press.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if self.joypad.set_button(button, pressed) {
            self.interrupts.raise(Interrupt::Joypad);
        }
    }

    /// Bus read used by the DMA engines: no locks, no diagnostics.
    fn dma_read_byte(&self, addr: u16) -> u8 {
        let addr = if addr >= 0xE000 {
            addr.wrapping_sub(0x2000)
        } else {
            addr
        };
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize],
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize],
            _ => 0xFF,
        }
    }

    /// Write to VRAM bypassing mode checks (used by DMA transfers)
    fn vram_dma_write(&mut self, addr: u16, val: u8) {
        self.ppu.vram[self.ppu.vram_bank][(addr & 0x1FFF) as usize] = val;
    }

    /// Return true while an OAM DMA countdown is running.
    pub fn dma_active(&self) -> bool {
        self.oam_dma.remaining > 0
    }

    fn oam_dma_step(&mut self, m_cycles: u32) {
        for _ in 0..m_cycles {
            if self.oam_dma.remaining == 0 {
                return;
            }
            self.ppu.skip_objects_for_scanline();
            self.oam_dma.remaining -= 1;
            if self.oam_dma.remaining == 0 {
                let base = (self.oam_dma.source as u16) << 8;
                for i in 0..OAM_DMA_LEN {
                    self.ppu.oam[i as usize] = self.dma_read_byte(base.wrapping_add(i));
                }
            }
        }
    }

    #[inline]
    fn sanitize_vram_dma_dest(addr: u16) -> u16 {
        0x8000 | (addr & 0x1FF0)
    }

    /// Perform a General DMA transfer immediately.
    fn start_gdma(&mut self, blocks: u8) {
        let total_bytes = blocks as usize * 0x10;
        let mut src = self.hdma.src;
        let mut dst = Self::sanitize_vram_dma_dest(self.hdma.dst);
        for _ in 0..total_bytes {
            let byte = self.dma_read_byte(src);
            self.vram_dma_write(dst, byte);
            src = src.wrapping_add(1);
            dst = 0x8000 | (dst.wrapping_add(1) & 0x1FFF);
        }
        self.hdma.src = src;
        self.hdma.dst = Self::sanitize_vram_dma_dest(dst);
        self.hdma.mode = DmaMode::Gdma;
        self.hdma.active = false;
        self.hdma.blocks = 0;
        self.hdma.cancelled = false;
    }

    /// Execute a single 0x10-byte HDMA burst during H-Blank.
    pub fn hdma_hblank_transfer(&mut self) {
        if !(self.hdma.active && self.hdma.mode == DmaMode::Hdma) {
            return;
        }
        self.perform_hdma_block();
    }

    fn perform_hdma_block(&mut self) {
        self.hdma.dst = Self::sanitize_vram_dma_dest(self.hdma.dst);
        for _ in 0..0x10 {
            let byte = self.dma_read_byte(self.hdma.src);
            self.vram_dma_write(self.hdma.dst, byte);
            self.hdma.src = self.hdma.src.wrapping_add(1);
            self.hdma.dst = 0x8000 | (self.hdma.dst.wrapping_add(1) & 0x1FFF);
        }
        self.hdma.blocks = self.hdma.blocks.saturating_sub(1);
        if self.hdma.blocks == 0 {
            self.hdma.active = false;
            self.hdma.cancelled = false;
        }
        self.hdma.dst = Self::sanitize_vram_dma_dest(self.hdma.dst);
    }

    fn complete_active_hdma(&mut self) {
        while self.hdma.active && self.hdma.mode == DmaMode::Hdma {
            self.perform_hdma_block();
        }
    }

    /// Advance the timer and the OAM DMA countdown by `m_cycles`.
    pub fn tick_peripherals(&mut self, m_cycles: u8) {
        self.timer.step(m_cycles as u32 * 4, &mut self.interrupts);
        self.oam_dma_step(m_cycles as u32);
    }

    /// Advance the PPU one dot, feeding HBlank DMA on HBlank entry.
    pub fn tick_ppu(&mut self) {
        if self.ppu.tick(&mut self.interrupts) {
            self.hdma_hblank_transfer();
        }
    }

    /// Advance the APU one dot. Returns true when its sample buffer filled.
    pub fn tick_apu(&mut self) -> bool {
        self.apu.tick()
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_maps_echo_onto_work_ram() {
        let mmu = Mmu::new();
        assert_eq!(mmu.resolve(0xE123), Some((Region::Wram0, 0x123)));
        assert_eq!(mmu.resolve(0xF000), Some((Region::WramBanked, 0)));
        assert_eq!(mmu.resolve(0xFFFF), Some((Region::Io(IoOwner::Interrupts), 0xFFFF)));
    }

    #[test]
    fn colour_registers_are_unregistered_on_dmg() {
        let dmg = Mmu::new_with_mode(false);
        let cgb = Mmu::new_with_mode(true);
        assert_eq!(dmg.resolve(0xFF70), None);
        assert_eq!(cgb.resolve(0xFF70), Some((Region::Io(IoOwner::WramBank), 0xFF70)));
        assert_eq!(dmg.resolve(0xFF01), None);
    }

    #[test]
    fn cart_window_unmapped_without_cartridge() {
        let mmu = Mmu::new();
        assert_eq!(mmu.resolve(0x4000), None);
        assert_eq!(mmu.resolve(0xA000), None);
    }
}
