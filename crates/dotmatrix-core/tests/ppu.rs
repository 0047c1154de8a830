use dotmatrix_core::{
    IoRegisters, InterruptFlags, Mmu,
    ppu::{Mode, Ppu, SCREEN_WIDTH},
};

const WHITE: [u8; 4] = [255, 255, 255, 255];
const LIGHT: [u8; 4] = [169, 169, 169, 255];
const DARK: [u8; 4] = [84, 84, 84, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Dots from the start of a line to the end of its picture generation.
const LINE_RENDERED: usize = 252;

fn run_dots(ppu: &mut Ppu, irq: &mut InterruptFlags, dots: usize) {
    for _ in 0..dots {
        ppu.tick(irq);
    }
}

fn pixel(fb: &[u8], x: usize, y: usize) -> [u8; 4] {
    let i = (y * SCREEN_WIDTH + x) * 4;
    [fb[i], fb[i + 1], fb[i + 2], fb[i + 3]]
}

/// Fill all eight rows of a tile with one colour index.
fn solid_tile(ppu: &mut Ppu, bank: usize, tile: usize, color: u8) {
    let lo = if color & 1 != 0 { 0xFF } else { 0x00 };
    let hi = if color & 2 != 0 { 0xFF } else { 0x00 };
    for row in 0..8 {
        ppu.vram[bank][tile * 16 + row * 2] = lo;
        ppu.vram[bank][tile * 16 + row * 2 + 1] = hi;
    }
}

/// Place an object by its raw OAM coordinates.
fn set_sprite(ppu: &mut Ppu, index: usize, y: u8, x: u8, tile: u8, flags: u8) {
    ppu.oam[index * 4..index * 4 + 4].copy_from_slice(&[y, x, tile, flags]);
}

/// DMG PPU with identity palettes, rendered through line 0.
fn render_first_line(mut ppu: Ppu, lcdc: u8) -> Ppu {
    let mut irq = InterruptFlags::new();
    ppu.write_register(0xFF47, 0xE4);
    ppu.write_register(0xFF48, 0xE4);
    ppu.write_register(0xFF40, lcdc);
    run_dots(&mut ppu, &mut irq, LINE_RENDERED);
    ppu
}

/// Tile 0 is solid colour 1 on row 0, tile 1 solid colour 2; the first map
/// row alternates them.
fn two_tile_pattern(ppu: &mut Ppu) {
    ppu.vram[0][0x0000] = 0xFF;
    ppu.vram[0][0x0001] = 0x00;
    ppu.vram[0][0x0010] = 0x00;
    ppu.vram[0][0x0011] = 0xFF;
    for i in 0..32 {
        ppu.vram[0][0x1800 + i] = (i % 2) as u8;
    }
}

#[test]
fn scanline_zero_matches_expected_row() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    two_tile_pattern(&mut ppu);
    ppu.write_register(0xFF47, 0xE4);
    ppu.write_register(0xFF42, 0x00);
    ppu.write_register(0xFF43, 0x00);
    ppu.write_register(0xFF40, 0x91);

    run_dots(&mut ppu, &mut irq, 252);
    assert_eq!(ppu.mode(), Mode::HBlank);

    let expected: Vec<u8> = (0..SCREEN_WIDTH)
        .flat_map(|x| if (x / 8) % 2 == 0 { LIGHT } else { DARK })
        .collect();
    assert_eq!(&ppu.framebuffer()[..SCREEN_WIDTH * 4], expected.as_slice());
}

#[test]
fn scroll_x_shifts_row() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    two_tile_pattern(&mut ppu);
    ppu.write_register(0xFF47, 0xE4);
    ppu.write_register(0xFF43, 0x04);
    ppu.write_register(0xFF40, 0x91);
    run_dots(&mut ppu, &mut irq, 252);

    let fb = ppu.framebuffer();
    assert_eq!(&fb[0..4], &LIGHT);
    assert_eq!(&fb[3 * 4..4 * 4], &LIGHT);
    assert_eq!(&fb[4 * 4..5 * 4], &DARK);
}

#[test]
fn sprite_drawn_over_background() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    // Tile 2: row 0 colour 3.
    ppu.vram[0][0x0020] = 0xFF;
    ppu.vram[0][0x0021] = 0xFF;
    ppu.oam[0] = 16;
    ppu.oam[1] = 8 + 10;
    ppu.oam[2] = 2;
    ppu.oam[3] = 0;
    ppu.write_register(0xFF47, 0x00);
    ppu.write_register(0xFF48, 0xE4);
    ppu.write_register(0xFF40, 0x93);
    run_dots(&mut ppu, &mut irq, 252);

    let fb = ppu.framebuffer();
    assert_eq!(&fb[9 * 4..10 * 4], &[255, 255, 255, 255]);
    assert_eq!(&fb[10 * 4..11 * 4], &[0, 0, 0, 255]);
    assert_eq!(&fb[17 * 4..18 * 4], &[0, 0, 0, 255]);
    assert_eq!(&fb[18 * 4..19 * 4], &[255, 255, 255, 255]);
}

#[test]
fn stat_interrupt_on_lyc_match() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    irq.raised = 0;
    ppu.write_register(0xFF45, 0x05);
    ppu.write_register(0xFF41, 0x40);
    ppu.write_register(0xFF40, 0x91);

    run_dots(&mut ppu, &mut irq, 456 * 5 - 1);
    assert_eq!(irq.raised & 0x02, 0);
    run_dots(&mut ppu, &mut irq, 1);
    assert_eq!(irq.raised & 0x02, 0x02);
    assert_eq!(ppu.read_register(0xFF41) & 0x04, 0x04);
}

#[test]
fn full_frame_returns_to_line_zero() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    ppu.write_register(0xFF40, 0x91);
    run_dots(&mut ppu, &mut irq, 456 * 154);
    assert_eq!(ppu.ly(), 0);
    assert_eq!(ppu.mode(), Mode::OamScan);
}

#[test]
fn window_starts_at_wx_minus_seven_from_wy() {
    let mut ppu = Ppu::new();
    let mut irq = InterruptFlags::new();
    solid_tile(&mut ppu, 0, 1, 3);
    ppu.vram[0][0x1C00..0x2000].fill(1);
    ppu.write_register(0xFF47, 0xE4);
    ppu.write_register(0xFF4A, 1);
    ppu.write_register(0xFF4B, 27);
    ppu.write_register(0xFF40, 0xF1);
    run_dots(&mut ppu, &mut irq, 456 + LINE_RENDERED);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 20, 0), WHITE);
    assert_eq!(pixel(fb, 19, 1), WHITE);
    assert_eq!(pixel(fb, 20, 1), BLACK);
    assert_eq!(pixel(fb, 159, 1), BLACK);
}

#[test]
fn behind_background_object_only_shows_over_colour_zero() {
    let mut ppu = Ppu::new();
    solid_tile(&mut ppu, 0, 1, 1);
    solid_tile(&mut ppu, 0, 2, 3);
    ppu.vram[0][0x1801] = 1;
    set_sprite(&mut ppu, 0, 16, 8 + 4, 2, 0x80);
    let ppu = render_first_line(ppu, 0x93);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 4, 0), BLACK);
    assert_eq!(pixel(fb, 7, 0), BLACK);
    assert_eq!(pixel(fb, 8, 0), LIGHT);
    assert_eq!(pixel(fb, 11, 0), LIGHT);
}

#[test]
fn objects_sharing_x_keep_lowest_oam_index() {
    let mut ppu = Ppu::new();
    // Tile 2: left half colour 3, right half transparent.
    for row in 0..8 {
        ppu.vram[0][0x20 + row * 2] = 0xF0;
        ppu.vram[0][0x21 + row * 2] = 0xF0;
    }
    solid_tile(&mut ppu, 0, 3, 1);
    set_sprite(&mut ppu, 0, 16, 8 + 10, 2, 0);
    set_sprite(&mut ppu, 1, 16, 8 + 10, 3, 0);
    let ppu = render_first_line(ppu, 0x93);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 10, 0), BLACK);
    assert_eq!(pixel(fb, 13, 0), BLACK);
    // The second object was dropped, so its opaque half never shows.
    assert_eq!(pixel(fb, 14, 0), WHITE);
    assert_eq!(pixel(fb, 17, 0), WHITE);
}

#[test]
fn at_most_ten_objects_per_line() {
    let mut ppu = Ppu::new();
    solid_tile(&mut ppu, 0, 2, 3);
    for i in 0..11 {
        set_sprite(&mut ppu, i, 16, 8 + 8 * i as u8, 2, 0);
    }
    let ppu = render_first_line(ppu, 0x93);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 0, 0), BLACK);
    assert_eq!(pixel(fb, 79, 0), BLACK);
    assert_eq!(pixel(fb, 80, 0), WHITE);
    assert_eq!(pixel(fb, 87, 0), WHITE);
}

#[test]
fn lower_x_object_wins_overlap() {
    let mut ppu = Ppu::new();
    solid_tile(&mut ppu, 0, 2, 3);
    solid_tile(&mut ppu, 0, 3, 1);
    set_sprite(&mut ppu, 0, 16, 8 + 20, 3, 0);
    set_sprite(&mut ppu, 1, 16, 8 + 16, 2, 0);
    let ppu = render_first_line(ppu, 0x93);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 16, 0), BLACK);
    assert_eq!(pixel(fb, 23, 0), BLACK);
    assert_eq!(pixel(fb, 24, 0), LIGHT);
    assert_eq!(pixel(fb, 27, 0), LIGHT);
}

#[test]
fn tall_objects_ignore_tile_bit_zero_and_flip_vertically() {
    let mut ppu = Ppu::new();
    solid_tile(&mut ppu, 0, 4, 1);
    solid_tile(&mut ppu, 0, 5, 3);
    set_sprite(&mut ppu, 0, 16, 8 + 10, 5, 0);
    set_sprite(&mut ppu, 1, 16, 8 + 30, 5, 0x40);
    let ppu = render_first_line(ppu, 0x97);

    let fb = ppu.framebuffer();
    // Top row of the pair comes from tile 4.
    assert_eq!(pixel(fb, 10, 0), LIGHT);
    // Flipped, the top row is the last row of tile 5.
    assert_eq!(pixel(fb, 30, 0), BLACK);
}

#[test]
fn signed_tile_addressing_when_lcdc_bit_four_clear() {
    let mut ppu = Ppu::new();
    solid_tile(&mut ppu, 0, 0, 3);
    // Index 0x80 lands at 0x0800, index 0x00 at 0x1000.
    solid_tile(&mut ppu, 0, 0x80, 1);
    solid_tile(&mut ppu, 0, 0x100, 2);
    ppu.vram[0][0x1800] = 0x80;
    ppu.vram[0][0x1801] = 0x00;
    let ppu = render_first_line(ppu, 0x81);

    let fb = ppu.framebuffer();
    assert_eq!(pixel(fb, 0, 0), LIGHT);
    assert_eq!(pixel(fb, 8, 0), DARK);
    assert_eq!(pixel(fb, 15, 0), DARK);
}

#[test]
fn cgb_tile_attributes_pick_palette_bank_and_flips() {
    let mut ppu = Ppu::new_with_mode(true);
    let mut irq = InterruptFlags::new();
    // Palette 2 colour 1 red, palette 0 colour 1 green.
    ppu.write_register(0xFF68, 0x80 | (2 * 8 + 2));
    ppu.write_register(0xFF69, 0x1F);
    ppu.write_register(0xFF69, 0x00);
    ppu.write_register(0xFF68, 0x80 | 2);
    ppu.write_register(0xFF69, 0xE0);
    ppu.write_register(0xFF69, 0x03);

    // Bank 1 tile 0: leftmost pixel of row 0, rightmost pixel of row 7.
    ppu.vram[1][0x00] = 0x80;
    ppu.vram[1][0x0E] = 0x01;
    ppu.vram[1][0x1800] = 0x02 | 0x08 | 0x20;
    ppu.vram[1][0x1801] = 0x08;
    ppu.vram[1][0x1802] = 0x08 | 0x40;
    ppu.write_register(0xFF40, 0x91);
    run_dots(&mut ppu, &mut irq, LINE_RENDERED);

    let fb = ppu.framebuffer();
    let red = [255, 0, 0, 255];
    let green = [0, 255, 0, 255];
    assert_eq!(pixel(fb, 0, 0), BLACK);
    assert_eq!(pixel(fb, 7, 0), red);
    assert_eq!(pixel(fb, 8, 0), green);
    assert_eq!(pixel(fb, 15, 0), BLACK);
    assert_eq!(pixel(fb, 16, 0), BLACK);
    assert_eq!(pixel(fb, 23, 0), green);
}

/// Post-boot bus with a black 8x8 object at (10, 0) over a white background.
fn mmu_with_sprite() -> Mmu {
    let mut mmu = Mmu::new();
    solid_tile(&mut mmu.ppu, 0, 2, 3);
    for (i, byte) in [16, 8 + 10, 2, 0].into_iter().enumerate() {
        mmu.write_byte(0xC000 + i as u16, byte);
    }
    mmu.ppu.oam[..4].copy_from_slice(&[16, 8 + 10, 2, 0]);
    mmu.write_byte(0xFF47, 0x00);
    mmu.write_byte(0xFF48, 0xE4);
    mmu.write_byte(0xFF40, 0x93);
    mmu
}

fn run_dma_cycles(mmu: &mut Mmu, m_cycles: usize) {
    for _ in 0..m_cycles {
        mmu.tick_peripherals(1);
        for _ in 0..4 {
            mmu.tick_ppu();
        }
    }
}

#[test]
fn oam_dma_hides_objects_only_on_lines_it_overlaps() {
    let mut mmu = mmu_with_sprite();
    mmu.write_byte(0xFF46, 0xC0);
    // Line 0 renders while the copy is still counting down.
    run_dma_cycles(&mut mmu, 63);
    assert_eq!(mmu.ppu.mode(), Mode::HBlank);
    // The copy finishes a third of the way into line 1.
    run_dma_cycles(&mut mmu, 97);
    assert!(!mmu.dma_active());
    for _ in 0..456 * 2 + LINE_RENDERED - 160 * 4 {
        mmu.tick_ppu();
    }
    assert_eq!(mmu.ppu.ly(), 2);

    let fb = mmu.ppu.framebuffer();
    assert_eq!(pixel(fb, 10, 0), WHITE);
    assert_eq!(pixel(fb, 10, 1), WHITE);
    assert_eq!(pixel(fb, 10, 2), BLACK);
}

#[test]
fn oam_dma_during_vblank_leaves_next_frame_objects() {
    let mut mmu = mmu_with_sprite();
    for _ in 0..456 * 144 {
        mmu.tick_ppu();
    }
    assert_eq!(mmu.ppu.mode(), Mode::VBlank);

    mmu.write_byte(0xFF46, 0xC0);
    run_dma_cycles(&mut mmu, 160);
    assert!(!mmu.dma_active());
    assert_eq!(mmu.ppu.oam[0], 16);

    for _ in 0..456 * 10 + LINE_RENDERED - 160 * 4 {
        mmu.tick_ppu();
    }
    assert_eq!(mmu.ppu.ly(), 0);
    assert_eq!(mmu.ppu.mode(), Mode::HBlank);
    assert_eq!(pixel(mmu.ppu.framebuffer(), 10, 0), BLACK);
}
