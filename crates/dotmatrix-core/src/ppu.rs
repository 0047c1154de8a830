use crate::interrupts::{Interrupt, InterruptFlags};
use crate::mmu::IoRegisters;

// Screen resolution used by the Game Boy PPU
pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
/// Bytes per framebuffer pixel (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

// Timing in dots, measured from the start of a scanline
const OAM_SCAN_END: u16 = 80;
const PICTURE_GENERATION_END: u16 = OAM_SCAN_END + 172;
const DOTS_PER_LINE: u16 = 456;

// Last scanline of the frame (144..=153 are VBlank)
const LAST_LINE: u8 = 153;

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Internal memory sizes
const VRAM_BANK_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0x100;
const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_UNUSED_BIT: u8 = 0x40;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

// VRAM layout constants
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const TILE_DATA_0_BASE: usize = 0x0000;
const TILE_DATA_1_BASE: usize = 0x0800;

/// Monochrome shades for colour indices 0..3 after palette mapping.
const DMG_SHADES: [[u8; 3]; 4] = [[255, 255, 255], [169, 169, 169], [84, 84, 84], [0, 0, 0]];

/// PPU phase within a scanline. The discriminant is the value reported in
/// STAT bits 0-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    PictureGeneration = 3,
}

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

pub struct Ppu {
    pub vram: [[u8; VRAM_BANK_SIZE]; 2],
    pub vram_bank: usize,
    pub oam: [u8; OAM_SIZE],

    cgb: bool,

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    /// Internal window line counter
    win_line_counter: u8,

    bgpi: u8,
    bgpd: [u8; PAL_RAM_SIZE],
    obpi: u8,
    obpd: [u8; PAL_RAM_SIZE],

    dot: u16,
    mode: Mode,

    framebuffer: Vec<u8>,
    line_priority: [bool; SCREEN_WIDTH],
    line_color_zero: [bool; SCREEN_WIDTH],
    /// Set while OAM DMA owns the bus; objects are left out of the line.
    skip_objects: bool,
}

impl Ppu {
    pub fn new_with_mode(cgb: bool) -> Self {
        Self {
            vram: [[0; VRAM_BANK_SIZE]; 2],
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            cgb,
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            win_line_counter: 0,
            bgpi: PAL_UNUSED_BIT,
            bgpd: [0; PAL_RAM_SIZE],
            obpi: PAL_UNUSED_BIT,
            obpd: [0; PAL_RAM_SIZE],
            dot: 0,
            mode: Mode::OamScan,
            framebuffer: vec![0xFF; SCREEN_WIDTH * SCREEN_HEIGHT * BYTES_PER_PIXEL],
            line_priority: [false; SCREEN_WIDTH],
            line_color_zero: [false; SCREEN_WIDTH],
            skip_objects: false,
        }
    }

    pub fn new() -> Self {
        Self::new_with_mode(false)
    }

    /// Initialize registers to the state expected after the boot ROM
    /// has finished executing.
    pub fn apply_boot_state(&mut self) {
        self.lcdc = 0x91;
        self.bgp = 0xFC;
        self.obp0 = 0xFF;
        self.obp1 = 0xFF;
        self.win_line_counter = 0;
        self.ly = 0;
        self.dot = 0;
        self.mode = Mode::OamScan;
        if self.cgb {
            for pair in self.bgpd.chunks_exact_mut(2) {
                pair[0] = 0xFF;
                pair[1] = 0x7F;
            }
        }
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn in_hblank(&self) -> bool {
        self.mode == Mode::HBlank
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    /// Returns the current value of the internal window line counter.
    pub fn window_line_counter(&self) -> u8 {
        self.win_line_counter
    }

    /// OAM is owned by the PPU during OAM scan and picture generation.
    pub fn oam_accessible(&self) -> bool {
        !(self.lcd_enabled() && matches!(self.mode, Mode::OamScan | Mode::PictureGeneration))
    }

    /// VRAM is owned by the PPU during picture generation.
    pub fn vram_accessible(&self) -> bool {
        !(self.lcd_enabled() && self.mode == Mode::PictureGeneration)
    }

    /// Leave objects out of the scanline currently being generated.
    pub fn skip_objects_for_scanline(&mut self) {
        self.skip_objects = true;
    }

    /// 160x144 RGBA8 pixels, row-major.
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    fn decode_cgb_color(lo: u8, hi: u8) -> [u8; 3] {
        let raw = ((hi as u16) << 8) | lo as u16;
        let expand = |c: u16| {
            let c = (c & 0x1F) as u8;
            c << 3 | c >> 2
        };
        [expand(raw), expand(raw >> 5), expand(raw >> 10)]
    }

    /// Get a CGB background palette color as RGB.
    pub fn bg_palette_color(&self, palette: usize, color_id: usize) -> [u8; 3] {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.bgpd[off], self.bgpd[off + 1])
    }

    /// Get a CGB object palette color as RGB.
    pub fn ob_palette_color(&self, palette: usize, color_id: usize) -> [u8; 3] {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.obpd[off], self.obpd[off + 1])
    }

    fn sanitize_palette_index(value: u8) -> u8 {
        (value & (PAL_AUTO_INCREMENT_BIT | PAL_INDEX_MASK)) | PAL_UNUSED_BIT
    }

    fn palette_ram_index(index: u8) -> usize {
        (index & PAL_INDEX_MASK) as usize
    }

    fn step_palette_index(index: &mut u8) {
        let current = *index;
        if current & PAL_AUTO_INCREMENT_BIT == 0 {
            return;
        }
        let next_idx = (current & PAL_INDEX_MASK).wrapping_add(1) & PAL_INDEX_MASK;
        *index = PAL_AUTO_INCREMENT_BIT | PAL_UNUSED_BIT | next_idx;
    }

    fn lcd_off(&mut self) {
        self.ly = 0;
        self.dot = 0;
        self.mode = Mode::OamScan;
        self.win_line_counter = 0;
        self.skip_objects = false;
        self.framebuffer.fill(0xFF);
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    #[inline]
    fn put_pixel(&mut self, x: usize, rgb: [u8; 3]) {
        let idx = (self.ly as usize * SCREEN_WIDTH + x) * BYTES_PER_PIXEL;
        self.framebuffer[idx..idx + 3].copy_from_slice(&rgb);
        self.framebuffer[idx + 3] = 0xFF;
    }

    /// Colour index of one pixel of an 8-pixel tile row.
    #[inline]
    fn tile_pixel(&self, bank: usize, addr: usize, row: usize, bit: usize) -> u8 {
        let lo = self.vram[bank][addr + row * 2];
        let hi = self.vram[bank][addr + row * 2 + 1];
        ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1)
    }

    fn tile_data_addr(&self, tile_index: u8) -> usize {
        if self.lcdc & 0x10 != 0 {
            TILE_DATA_0_BASE + tile_index as usize * 16
        } else {
            TILE_DATA_1_BASE + ((tile_index as i8 as i16 + 128) as usize) * 16
        }
    }

    /// Draw one background or window pixel from tile-map coordinates.
    fn draw_tile_pixel(&mut self, x: usize, map_base: usize, map_x: usize, map_y: usize) {
        let map_idx = map_base + (map_y / 8) * 32 + map_x / 8;
        let tile_index = self.vram[0][map_idx];
        let addr = self.tile_data_addr(tile_index);
        let mut tile_y = map_y % 8;
        let mut bit = 7 - map_x % 8;
        let mut priority = false;
        let mut palette = 0usize;
        let mut bank = 0usize;
        if self.cgb {
            let attr = self.vram[1][map_idx];
            palette = (attr & 0x07) as usize;
            bank = if attr & 0x08 != 0 { 1 } else { 0 };
            if attr & 0x20 != 0 {
                bit = map_x % 8;
            }
            if attr & 0x40 != 0 {
                tile_y = 7 - tile_y;
            }
            priority = attr & 0x80 != 0;
        }
        let color_id = self.tile_pixel(bank, addr, tile_y, bit);
        let color = if self.cgb {
            self.bg_palette_color(palette, color_id as usize)
        } else {
            DMG_SHADES[Self::dmg_shade(self.bgp, color_id) as usize]
        };
        self.put_pixel(x, color);
        self.line_priority[x] = priority;
        self.line_color_zero[x] = color_id == 0;
    }

    fn render_scanline(&mut self) {
        if !self.lcd_enabled() || self.ly as usize >= SCREEN_HEIGHT {
            return;
        }

        self.line_priority.fill(false);
        self.line_color_zero.fill(true);

        let bg_enabled = self.cgb || self.lcdc & 0x01 != 0;

        if bg_enabled {
            let bg_map = if self.lcdc & 0x08 != 0 {
                BG_MAP_1_BASE
            } else {
                BG_MAP_0_BASE
            };
            let map_y = (self.ly as usize + self.scy as usize) & 0xFF;
            for x in 0..SCREEN_WIDTH {
                let map_x = (x + self.scx as usize) & 0xFF;
                self.draw_tile_pixel(x, bg_map, map_x, map_y);
            }

            if self.lcdc & 0x20 != 0 && self.ly >= self.wy && self.wx <= WINDOW_X_MAX {
                let win_map = if self.lcdc & 0x40 != 0 {
                    BG_MAP_1_BASE
                } else {
                    BG_MAP_0_BASE
                };
                let start = self.wx as i16 - 7;
                let window_y = self.win_line_counter as usize;
                for x in start.max(0) as usize..SCREEN_WIDTH {
                    let window_x = (x as i16 - start) as usize;
                    self.draw_tile_pixel(x, win_map, window_x, window_y);
                }
                self.win_line_counter = self.win_line_counter.wrapping_add(1);
            }
        } else {
            // Background disabled on DMG: colour 0 of BGP.
            let color = DMG_SHADES[Self::dmg_shade(self.bgp, 0) as usize];
            for x in 0..SCREEN_WIDTH {
                self.put_pixel(x, color);
            }
        }

        if self.lcdc & 0x02 != 0 && !self.skip_objects {
            self.render_sprites(bg_enabled);
        }
    }

    /// Sprites that intersect the current line, one per X position, at most
    /// ten, in OAM order.
    fn line_sprites(&self) -> Vec<Sprite> {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let ly = self.ly as i16;
        let mut sprites: Vec<Sprite> = Vec::with_capacity(MAX_SPRITES_PER_LINE);
        for i in 0..TOTAL_SPRITES {
            if sprites.len() >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if ly < y || ly >= y + sprite_height {
                continue;
            }
            let x = self.oam[base + 1] as i16 - 8;
            if sprites.iter().any(|s| s.x == x) {
                continue;
            }
            sprites.push(Sprite {
                x,
                y,
                tile: self.oam[base + 2],
                flags: self.oam[base + 3],
                oam_index: i,
            });
        }
        sprites
    }

    fn render_sprites(&mut self, bg_enabled: bool) {
        let sprite_height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let master_priority = !self.cgb || self.lcdc & 0x01 != 0;
        let mut sprites = self.line_sprites();
        // Painted back to front: the winner of an overlap is drawn last.
        if self.cgb {
            sprites.sort_by_key(|s| std::cmp::Reverse(s.oam_index));
        } else {
            sprites.sort_by_key(|s| std::cmp::Reverse(s.x));
        }

        for s in &sprites {
            let mut tile = s.tile;
            if sprite_height == 16 {
                tile &= 0xFE;
            }
            let mut line_idx = self.ly as i16 - s.y;
            if s.flags & 0x40 != 0 {
                line_idx = sprite_height - 1 - line_idx;
            }
            let bank = if self.cgb {
                ((s.flags >> 3) & 0x01) as usize
            } else {
                0
            };
            let addr = (tile as usize + (line_idx as usize >> 3)) * 16;
            for px in 0..8usize {
                let bit = if s.flags & 0x20 != 0 { px } else { 7 - px };
                let color_id = self.tile_pixel(bank, addr, line_idx as usize & 7, bit);
                if color_id == 0 {
                    continue;
                }
                let sx = s.x + px as i16;
                if !(0i16..SCREEN_WIDTH as i16).contains(&sx) {
                    continue;
                }
                let sx = sx as usize;
                let bg_zero = !bg_enabled || self.line_color_zero[sx];
                if master_priority {
                    if self.cgb && self.line_priority[sx] && !bg_zero {
                        continue;
                    }
                    if s.flags & 0x80 != 0 && !bg_zero {
                        continue;
                    }
                }
                let color = if self.cgb {
                    self.ob_palette_color((s.flags & 0x07) as usize, color_id as usize)
                } else if s.flags & 0x10 != 0 {
                    DMG_SHADES[Self::dmg_shade(self.obp1, color_id) as usize]
                } else {
                    DMG_SHADES[Self::dmg_shade(self.obp0, color_id) as usize]
                };
                self.put_pixel(sx, color);
            }
        }
    }

    /// Restart line timing after the LCD is switched back on.
    pub fn lcd_on(&mut self, irq: &mut InterruptFlags) {
        self.dot = 0;
        self.enter_oam_scan(irq);
    }

    /// Start the next scanline's dot count. A DMA still running keeps
    /// re-arming the object skip every M-cycle.
    fn begin_line(&mut self) {
        self.dot = 0;
        self.skip_objects = false;
    }

    fn enter_oam_scan(&mut self, irq: &mut InterruptFlags) {
        self.mode = Mode::OamScan;
        if self.stat & 0x20 != 0 {
            irq.raise(Interrupt::Stat);
        }
    }

    fn compare_ly(&mut self, irq: &mut InterruptFlags) {
        if self.ly == self.lyc && self.stat & 0x40 != 0 {
            irq.raise(Interrupt::Stat);
        }
    }

    /// Advance one dot. Returns true on the dot HBlank begins, which is when
    /// an armed HBlank VRAM DMA may move its next block.
    pub fn tick(&mut self, irq: &mut InterruptFlags) -> bool {
        if !self.lcd_enabled() {
            return false;
        }

        self.dot += 1;
        match self.mode {
            Mode::OamScan => {
                if self.dot >= OAM_SCAN_END {
                    self.mode = Mode::PictureGeneration;
                }
            }
            Mode::PictureGeneration => {
                if self.dot >= PICTURE_GENERATION_END {
                    self.render_scanline();
                    self.mode = Mode::HBlank;
                    if self.stat & 0x08 != 0 {
                        irq.raise(Interrupt::Stat);
                    }
                    return true;
                }
            }
            Mode::HBlank => {
                if self.dot >= DOTS_PER_LINE {
                    self.begin_line();
                    self.ly += 1;
                    self.compare_ly(irq);
                    if self.ly as usize == SCREEN_HEIGHT {
                        self.mode = Mode::VBlank;
                        irq.raise(Interrupt::VBlank);
                        if self.stat & 0x10 != 0 {
                            irq.raise(Interrupt::Stat);
                        }
                    } else {
                        self.enter_oam_scan(irq);
                    }
                }
            }
            Mode::VBlank => {
                if self.dot >= DOTS_PER_LINE {
                    self.begin_line();
                    if self.ly >= LAST_LINE {
                        self.ly = 0;
                        self.win_line_counter = 0;
                        self.compare_ly(irq);
                        self.enter_oam_scan(irq);
                    } else {
                        self.ly += 1;
                        self.compare_ly(irq);
                    }
                }
            }
        }
        false
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegisters for Ppu {
    fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                let mode = if self.lcd_enabled() {
                    self.mode as u8
                } else {
                    0
                };
                (self.stat & 0x78) | 0x80 | mode | if self.ly == self.lyc { 0x04 } else { 0 }
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF68 if self.cgb => self.bgpi,
            0xFF69 if self.cgb => self.bgpd[Self::palette_ram_index(self.bgpi)],
            0xFF6A if self.cgb => self.obpi,
            0xFF6B if self.cgb => self.obpd[Self::palette_ram_index(self.obpi)],
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                if was_on && !self.lcd_enabled() {
                    self.lcd_off();
                }
            }
            0xFF41 => self.stat = (self.stat & 0x07) | (val & 0x78),
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF44 => {}
            0xFF45 => self.lyc = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF68 if self.cgb => self.bgpi = Self::sanitize_palette_index(val),
            0xFF69 if self.cgb => {
                let idx = Self::palette_ram_index(self.bgpi);
                self.bgpd[idx] = val;
                Self::step_palette_index(&mut self.bgpi);
            }
            0xFF6A if self.cgb => self.obpi = Self::sanitize_palette_index(val),
            0xFF6B if self.cgb => {
                let idx = Self::palette_ram_index(self.obpi);
                self.obpd[idx] = val;
                Self::step_palette_index(&mut self.obpi);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_dots(ppu: &mut Ppu, irq: &mut InterruptFlags, dots: usize) {
        for _ in 0..dots {
            ppu.tick(irq);
        }
    }

    #[test]
    fn mode_sequence_within_a_line() {
        let mut ppu = Ppu::new();
        let mut irq = InterruptFlags::new();
        ppu.write_register(0xFF40, 0x91);
        assert_eq!(ppu.mode(), Mode::OamScan);
        run_dots(&mut ppu, &mut irq, 80);
        assert_eq!(ppu.mode(), Mode::PictureGeneration);
        run_dots(&mut ppu, &mut irq, 172);
        assert_eq!(ppu.mode(), Mode::HBlank);
        run_dots(&mut ppu, &mut irq, 204);
        assert_eq!(ppu.mode(), Mode::OamScan);
        assert_eq!(ppu.ly(), 1);
    }

    #[test]
    fn frame_wraps_after_154_lines() {
        let mut ppu = Ppu::new();
        let mut irq = InterruptFlags::new();
        ppu.write_register(0xFF40, 0x91);
        run_dots(&mut ppu, &mut irq, 456 * 144);
        assert_eq!(ppu.mode(), Mode::VBlank);
        assert_eq!(ppu.ly(), 144);
        run_dots(&mut ppu, &mut irq, 456 * 10);
        assert_eq!(ppu.mode(), Mode::OamScan);
        assert_eq!(ppu.ly(), 0);
    }

    #[test]
    fn lyc_match_raises_stat_when_enabled() {
        let mut ppu = Ppu::new();
        let mut irq = InterruptFlags::new();
        irq.raised = 0;
        ppu.write_register(0xFF40, 0x91);
        ppu.write_register(0xFF45, 2);
        ppu.write_register(0xFF41, 0x40);
        run_dots(&mut ppu, &mut irq, 456);
        assert!(!irq.is_raised(Interrupt::Stat));
        run_dots(&mut ppu, &mut irq, 456);
        assert!(irq.is_raised(Interrupt::Stat));
        assert_eq!(ppu.read_register(0xFF41) & 0x04, 0x04);
    }

    #[test]
    fn palette_index_auto_increments_on_write() {
        let mut ppu = Ppu::new_with_mode(true);
        ppu.write_register(0xFF68, 0x80);
        ppu.write_register(0xFF69, 0x1F);
        ppu.write_register(0xFF69, 0x00);
        assert_eq!(ppu.read_register(0xFF68), 0xC2);
        assert_eq!(ppu.bg_palette_color(0, 0), [255, 0, 0]);
    }

    #[test]
    fn colour_registers_unmapped_on_dmg() {
        let mut ppu = Ppu::new();
        ppu.write_register(0xFF68, 0x80);
        assert_eq!(ppu.read_register(0xFF68), 0xFF);
    }

    #[test]
    fn window_counter_advances_only_on_window_lines() {
        let mut ppu = Ppu::new();
        let mut irq = InterruptFlags::new();
        ppu.write_register(0xFF4A, 2);
        ppu.write_register(0xFF4B, 7);
        ppu.write_register(0xFF40, 0xB1);
        run_dots(&mut ppu, &mut irq, 456 * 4);
        assert_eq!(ppu.window_line_counter(), 2);
    }
}
