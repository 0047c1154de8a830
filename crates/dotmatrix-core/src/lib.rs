//! Game Boy / Game Boy Color emulation core.
//!
//! The crate holds the platform-agnostic machine: CPU, memory dispatcher with
//! cartridge bank controllers, PPU and the peripherals they share a bus with.
//! Frontends drive it through the [`gameboy`] facade.

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Cartridge header parsing and bank controllers.
pub mod cartridge;

/// LR35902 CPU core.
pub mod cpu;

/// Injectable sinks for bus diagnostics.
pub mod diagnostics;

/// Crate-wide error type.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Console models.
pub mod hardware;

/// Interrupt enable/request registers.
pub mod interrupts;

/// Joypad input register.
pub mod joypad;

/// Memory map and I/O register dispatch.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Divider/timer unit.
pub mod timer;

pub use cartridge::{Cartridge, MbcType};
pub use cpu::Cpu;
pub use diagnostics::{Diagnostic, DiagnosticSink, Level, LogSink, RecordingSink};
pub use error::EmuError;
pub use gameboy::{AudioCallback, FRAME_M_CYCLES, GameBoy};
pub use hardware::Model;
pub use interrupts::{Interrupt, InterruptFlags};
pub use joypad::Button;
pub use mmu::{IoRegisters, Mmu};
pub use ppu::{Mode, Ppu, SCREEN_HEIGHT, SCREEN_WIDTH};
