use std::fs;

use dotmatrix_core::{
    EmuError,
    cartridge::{Cartridge, MbcType},
};
use tempfile::tempdir;

/// ROM image whose every bank starts with its own bank number.
fn banked_rom(cart_type: u8, ram_code: u8, banks: usize) -> Vec<u8> {
    let mut rom = vec![0u8; banks * 0x4000];
    for bank in 0..banks {
        rom[bank * 0x4000] = bank as u8;
    }
    rom[0x0147] = cart_type;
    rom[0x0149] = ram_code;
    rom
}

#[test]
fn mbc1_bank_zero_selects_bank_one() {
    let mut cart = Cartridge::load(banked_rom(0x01, 0x00, 4)).unwrap();
    assert_eq!(cart.mbc, MbcType::Mbc1);
    assert_eq!(cart.read(0x4000), 1);

    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 1);

    cart.write(0x2000, 0x03);
    assert_eq!(cart.read(0x4000), 3);

    cart.write(0x2000, 0x20);
    assert_eq!(cart.read(0x4000), 1);
}

#[test]
fn mbc1_secondary_register_extends_rom_bank() {
    let mut cart = Cartridge::load(banked_rom(0x01, 0x00, 64)).unwrap();
    cart.write(0x2000, 0x02);
    cart.write(0x4000, 0x01);
    assert_eq!(cart.read(0x4000), 0x22);

    // Mode 1 also banks the lower window.
    assert_eq!(cart.read(0x0000), 0);
    cart.write(0x6000, 0x01);
    assert_eq!(cart.read(0x0000), 0x20);
}

#[test]
fn ram_gated_by_enable_latch() {
    let mut cart = Cartridge::load(banked_rom(0x03, 0x02, 2)).unwrap();
    cart.write(0xA000, 0x12);
    assert_eq!(cart.read(0xA000), 0xFF);

    cart.write(0x0000, 0x0A);
    cart.write(0xA000, 0x12);
    assert_eq!(cart.read(0xA000), 0x12);

    cart.write(0x0000, 0x00);
    assert_eq!(cart.read(0xA000), 0xFF);
    assert_eq!(cart.ram[0], 0x12);
}

#[test]
fn mbc3_rom_and_ram_banking() {
    let mut cart = Cartridge::load(banked_rom(0x13, 0x03, 8)).unwrap();
    assert_eq!(cart.mbc, MbcType::Mbc3);
    cart.write(0x2000, 0x05);
    assert_eq!(cart.read(0x4000), 5);
    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 1);

    cart.write(0x0000, 0x0A);
    cart.write(0x4000, 0x02);
    cart.write(0xA000, 0x77);
    cart.write(0x4000, 0x00);
    assert_eq!(cart.read(0xA000), 0x00);
    cart.write(0x4000, 0x02);
    assert_eq!(cart.read(0xA000), 0x77);
}

#[test]
fn mbc3_clock_selector_reads_zero() {
    let mut cart = Cartridge::load(banked_rom(0x10, 0x03, 2)).unwrap();
    cart.write(0x0000, 0x0A);
    cart.write(0xA000, 0x55);
    cart.write(0x4000, 0x08);
    assert_eq!(cart.read(0xA000), 0x00);
    cart.write(0xA000, 0x99);
    cart.write(0x4000, 0x00);
    assert_eq!(cart.read(0xA000), 0x55);
}

#[test]
fn unsupported_mapper_is_rejected() {
    let err = Cartridge::load(banked_rom(0x05, 0x00, 2)).unwrap_err();
    assert!(matches!(err, EmuError::UnsupportedMapper { code: 0x05 }));
}

#[test]
fn truncated_rom_is_rejected() {
    let err = Cartridge::load(vec![0u8; 0x100]).unwrap_err();
    assert!(matches!(err, EmuError::RomTooSmall { len: 0x100 }));
}

#[test]
fn direct_cart_reads_flat_rom() {
    let mut rom = banked_rom(0x00, 0x00, 2);
    rom[0x7FFF] = 0xAB;
    let mut cart = Cartridge::load(rom).unwrap();
    assert_eq!(cart.mbc, MbcType::Direct);
    cart.write(0x2000, 0x05);
    assert_eq!(cart.read(0x4000), 1);
    assert_eq!(cart.read(0x7FFF), 0xAB);
}

#[test]
fn cartridge_loads_from_file() {
    let dir = tempdir().unwrap();
    let rom_path = dir.path().join("game.gb");

    let mut rom = banked_rom(0x11, 0x00, 4);
    rom[0x0134..0x0139].copy_from_slice(b"HELLO");
    fs::write(&rom_path, &rom).unwrap();

    let cart = Cartridge::from_file(&rom_path).unwrap();
    assert_eq!(cart.title, "HELLO");
    assert_eq!(cart.cart_type(), 0x11);
    assert!(cart.ram.is_empty());
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = Cartridge::from_file(dir.path().join("absent.gb")).unwrap_err();
    assert!(matches!(err, EmuError::Io(_)));
}
