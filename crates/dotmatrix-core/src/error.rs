use thiserror::Error;

/// Faults that stop emulation outright.
///
/// Bus accesses to unmapped addresses are not errors; they are reported
/// through the MMU's diagnostic sink and emulation carries on.
#[derive(Error, Debug)]
pub enum EmuError {
    #[error("unsupported cartridge type {code:#04X}")]
    UnsupportedMapper { code: u8 },
    #[error("ROM image is {len} bytes, too small to hold a cartridge header")]
    RomTooSmall { len: usize },
    #[error("boot ROM must be 256 bytes, got {len}")]
    InvalidBootRom { len: usize },
    #[error("illegal opcode {opcode:#04X} at PC={pc:#06X}")]
    IllegalOpcode { opcode: u8, pc: u16 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
