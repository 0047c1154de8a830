use crate::mmu::IoRegisters;

/// Interrupt sources in priority order (lowest bit wins).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    Stat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Interrupt::VBlank => 0x01,
            Interrupt::Stat => 0x02,
            Interrupt::Timer => 0x04,
            Interrupt::Serial => 0x08,
            Interrupt::Joypad => 0x10,
        }
    }

    /// Handler address (gbdev.io/pandocs/Interrupts.html).
    #[inline]
    pub const fn vector(self) -> u16 {
        match self {
            Interrupt::VBlank => 0x40,
            Interrupt::Stat => 0x48,
            Interrupt::Timer => 0x50,
            Interrupt::Serial => 0x58,
            Interrupt::Joypad => 0x60,
        }
    }
}

/// IE (0xFFFF) and IF (0xFF0F).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptFlags {
    pub enabled: u8,
    pub raised: u8,
}

impl InterruptFlags {
    pub fn new() -> Self {
        Self {
            enabled: 0,
            raised: 0xE0,
        }
    }

    #[inline]
    pub fn raise(&mut self, irq: Interrupt) {
        self.raised |= irq.bit();
    }

    #[inline]
    pub fn clear(&mut self, irq: Interrupt) {
        self.raised &= !irq.bit();
    }

    #[inline]
    pub fn is_raised(&self, irq: Interrupt) -> bool {
        self.raised & irq.bit() != 0
    }

    /// Bits that are both raised and enabled.
    #[inline]
    pub fn pending_bits(&self) -> u8 {
        self.enabled & self.raised & 0x1F
    }

    /// Highest-priority interrupt that is raised and enabled.
    pub fn pending(&self) -> Option<Interrupt> {
        let bits = self.pending_bits();
        Interrupt::ALL.into_iter().find(|irq| bits & irq.bit() != 0)
    }
}

impl Default for InterruptFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegisters for InterruptFlags {
    fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF0F => self.raised | 0xE0,
            0xFFFF => self.enabled,
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF0F => self.raised = (val & 0x1F) | (self.raised & 0xE0),
            0xFFFF => self.enabled = val,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_picks_lowest_bit() {
        let mut irq = InterruptFlags::new();
        irq.enabled = 0x1F;
        irq.raise(Interrupt::Joypad);
        irq.raise(Interrupt::Timer);
        assert_eq!(irq.pending(), Some(Interrupt::Timer));
        irq.clear(Interrupt::Timer);
        assert_eq!(irq.pending(), Some(Interrupt::Joypad));
    }

    #[test]
    fn disabled_sources_are_not_pending() {
        let mut irq = InterruptFlags::new();
        irq.raise(Interrupt::VBlank);
        assert_eq!(irq.pending(), None);
        irq.enabled = 0x01;
        assert_eq!(irq.pending(), Some(Interrupt::VBlank));
    }

    #[test]
    fn if_register_reads_upper_bits_set() {
        let mut irq = InterruptFlags::new();
        irq.write_register(0xFF0F, 0x04);
        assert_eq!(irq.read_register(0xFF0F), 0xE4);
    }
}
