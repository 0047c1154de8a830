use std::{fs, path::Path};

use log::info;

use crate::error::EmuError;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const HEADER_END: usize = 0x0150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    Direct,
    Mbc1,
    Mbc3,
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub cgb: bool,
    pub title: String,
    cart_type: u8,
    mbc_state: MbcState,
}

#[derive(Debug)]
enum MbcState {
    Direct {
        ram_enable: bool,
    },
    Mbc1 {
        rom_bank: u8,
        secondary: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
    },
}

impl MbcState {
    fn power_on(mbc: MbcType) -> Self {
        match mbc {
            MbcType::Direct => MbcState::Direct { ram_enable: false },
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                secondary: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        }
    }
}

impl Cartridge {
    /// Parse the header and build the matching bank controller.
    pub fn load(data: Vec<u8>) -> Result<Self, EmuError> {
        if data.len() < HEADER_END {
            return Err(EmuError::RomTooSmall { len: data.len() });
        }
        let header = Header::parse(&data);
        let cart_type = header.cart_type();
        let mbc = header.mbc_type()?;
        let ram_size = header.ram_size();
        let cgb = header.cgb_supported();
        let title = header.title();

        let mbc_state = MbcState::power_on(mbc);

        info!(
            "Loaded ROM: {} (MBC: {:?}, type {:#04X}, RAM {} bytes, CGB: {})",
            title,
            mbc,
            cart_type,
            ram_size,
            if cgb { "yes" } else { "no" }
        );

        Ok(Self {
            rom: data,
            ram: vec![0; ram_size],
            mbc,
            cgb,
            title,
            cart_type,
            mbc_state,
        })
    }

    /// Return the bank registers to their power-on values. RAM is kept.
    pub fn reset_banks(&mut self) {
        self.mbc_state = MbcState::power_on(self.mbc);
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EmuError> {
        let data = fs::read(path)?;
        Self::load(data)
    }

    /// Header type byte (0x147) this cartridge was loaded with.
    pub fn cart_type(&self) -> u8 {
        self.cart_type
    }

    fn rom_bank_count(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    fn ram_bank_count(&self) -> usize {
        self.ram.len().div_ceil(RAM_BANK_SIZE)
    }

    fn rom_byte(&self, bank: usize, addr: u16) -> u8 {
        let bank = bank % self.rom_bank_count();
        let offset = bank * ROM_BANK_SIZE + (addr as usize & (ROM_BANK_SIZE - 1));
        self.rom.get(offset).copied().unwrap_or(0xFF)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match (&self.mbc_state, addr) {
            (MbcState::Direct { .. }, 0x0000..=0x7FFF) => {
                self.rom.get(addr as usize).copied().unwrap_or(0xFF)
            }
            (
                MbcState::Mbc1 {
                    secondary, mode, ..
                },
                0x0000..=0x3FFF,
            ) => {
                let bank = if *mode == 0 {
                    0
                } else {
                    ((*secondary as usize) & 0x03) << 5
                };
                self.rom_byte(bank, addr)
            }
            (
                MbcState::Mbc1 {
                    rom_bank,
                    secondary,
                    ..
                },
                0x4000..=0x7FFF,
            ) => {
                let high = ((*secondary as usize) & 0x03) << 5;
                let bank = high | (*rom_bank as usize & 0x1F);
                self.rom_byte(bank, addr)
            }
            (MbcState::Mbc3 { .. }, 0x0000..=0x3FFF) => self.rom_byte(0, addr),
            (MbcState::Mbc3 { rom_bank, .. }, 0x4000..=0x7FFF) => {
                self.rom_byte(*rom_bank as usize, addr)
            }
            (MbcState::Direct { ram_enable }, 0xA000..=0xBFFF)
            | (MbcState::Mbc1 { ram_enable, .. }, 0xA000..=0xBFFF) => {
                if !*ram_enable {
                    0xFF
                } else {
                    self.ram_index(addr)
                        .and_then(|idx| self.ram.get(idx).copied())
                        .unwrap_or(0xFF)
                }
            }
            (
                MbcState::Mbc3 {
                    ram_enable,
                    ram_bank,
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                if !*ram_enable {
                    0xFF
                } else if *ram_bank > 0x03 {
                    // Clock registers are not emulated.
                    0x00
                } else {
                    self.ram_index(addr)
                        .and_then(|idx| self.ram.get(idx).copied())
                        .unwrap_or(0xFF)
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        if (0xA000..=0xBFFF).contains(&addr) {
            self.write_ram(addr, val);
            return;
        }
        match (&mut self.mbc_state, addr) {
            (MbcState::Direct { ram_enable }, 0x0000..=0x1FFF)
            | (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF)
            | (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                let bank = val & 0x1F;
                *rom_bank = if bank == 0 { 1 } else { bank };
            }
            (MbcState::Mbc1 { secondary, .. }, 0x4000..=0x5FFF) => {
                *secondary = val & 0x03;
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                let bank = val & 0x7F;
                *rom_bank = if bank == 0 { 1 } else { bank };
            }
            (MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val;
            }
            // Clock latch; nothing to latch without an RTC.
            (MbcState::Mbc3 { .. }, 0x6000..=0x7FFF) => {}
            _ => {}
        }
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        let writable = match self.mbc_state {
            MbcState::Direct { ram_enable } | MbcState::Mbc1 { ram_enable, .. } => ram_enable,
            MbcState::Mbc3 {
                ram_enable,
                ram_bank,
                ..
            } => ram_enable && ram_bank <= 0x03,
        };
        if !writable {
            return;
        }
        if let Some(idx) = self.ram_index(addr)
            && let Some(b) = self.ram.get_mut(idx)
        {
            *b = val;
        }
    }

    fn ram_index(&self, addr: u16) -> Option<usize> {
        let bank_count = self.ram_bank_count();
        if bank_count == 0 {
            return None;
        }
        let offset = addr as usize - 0xA000;
        let bank = match &self.mbc_state {
            MbcState::Direct { .. } => 0,
            MbcState::Mbc1 {
                secondary, mode, ..
            } => {
                if *mode == 0 {
                    0
                } else {
                    (*secondary as usize) % bank_count
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => ((*ram_bank as usize) & 0x03) % bank_count,
        };
        Some(bank * RAM_BANK_SIZE + offset)
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let end = 0x0143.min(self.data.len());
        let mut slice = &self.data[0x0134.min(self.data.len())..end];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cgb_supported(&self) -> bool {
        self.data.get(0x0143).copied().unwrap_or(0) & 0x80 != 0
    }

    fn cart_type(&self) -> u8 {
        self.data.get(0x0147).copied().unwrap_or(0)
    }

    fn mbc_type(&self) -> Result<MbcType, EmuError> {
        match self.cart_type() {
            0x00 | 0x08 | 0x09 => Ok(MbcType::Direct),
            0x01..=0x03 => Ok(MbcType::Mbc1),
            0x0F..=0x13 => Ok(MbcType::Mbc3),
            code => Err(EmuError::UnsupportedMapper { code }),
        }
    }

    fn ram_size(&self) -> usize {
        match self.data.get(0x0149).copied().unwrap_or(0) {
            0x01 => 0x800,   // 2KB
            0x02 => 0x2000,  // 8KB
            0x03 => 0x8000,  // 32KB (4 banks)
            0x04 => 0x20000, // 128KB (16 banks)
            0x05 => 0x10000, // 64KB (8 banks)
            _ => 0,
        }
    }
}
