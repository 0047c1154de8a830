use crate::interrupts::{Interrupt, InterruptFlags};
use crate::mmu::IoRegisters;

/// Dots between a TIMA overflow and the TMA reload.
const RELOAD_DELAY: u8 = 4;

pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    pub div: u16,
    /// Timer counter
    pub tima: u8,
    /// Timer modulo
    pub tma: u8,
    /// Timer control
    pub tac: u8,
    last_signal: bool,
    /// Value to reload TIMA with after an overflow delay
    pending_reload: Option<u8>,
    /// Dots left before the pending reload is applied
    reload_delay: u8,
    /// Whether the reload was applied on the most recent dot
    reloading: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            div: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            last_signal: false,
            pending_reload: None,
            reload_delay: 0,
            reloading: false,
        }
    }

    /// Advance the timer by `dots` clock ticks, raising the timer interrupt
    /// when a TIMA reload completes.
    pub fn step(&mut self, dots: u32, irq: &mut InterruptFlags) {
        for _ in 0..dots {
            self.reloading = false;
            if self.advance_reload() {
                irq.raise(Interrupt::Timer);
            }
            let prev = self.last_signal;
            self.div = self.div.wrapping_add(1);
            let new = self.signal();
            if prev && !new {
                self.increment();
            }
            self.last_signal = new;
        }
    }

    /// Reset the internal divider counter, applying TIMA edge logic.
    pub fn reset_div(&mut self) {
        let prev = Self::signal_with(self.div, self.tac);
        self.div = 0;
        if prev {
            self.increment();
        }
        self.last_signal = false;
    }

    /// Count down a pending reload. Returns true on the dot TMA lands in TIMA.
    fn advance_reload(&mut self) -> bool {
        let Some(val) = self.pending_reload else {
            return false;
        };
        self.reload_delay = self.reload_delay.saturating_sub(1);
        if self.reload_delay > 0 {
            return false;
        }
        self.tima = val;
        self.pending_reload = None;
        self.reloading = true;
        true
    }

    fn increment(&mut self) {
        if self.tima == 0xFF {
            self.tima = 0;
            self.pending_reload = Some(self.tma);
            self.reload_delay = RELOAD_DELAY;
        } else {
            self.tima = self.tima.wrapping_add(1);
        }
    }

    fn signal(&self) -> bool {
        Self::signal_with(self.div, self.tac)
    }

    fn signal_with(div: u16, tac: u8) -> bool {
        if tac & 0x04 == 0 {
            return false;
        }
        let bit = match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        (div >> bit) & 1 != 0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegisters for Timer {
    fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => self.reset_div(),
            0xFF05 => {
                // Writes on the reload dot itself are ignored.
                if self.reloading {
                    return;
                }
                self.tima = val;
                // A write during the delay cancels the pending reload.
                self.pending_reload = None;
                self.reload_delay = 0;
            }
            0xFF06 => {
                self.tma = val;
                if self.pending_reload.is_some() {
                    self.pending_reload = Some(val);
                }
                if self.reloading {
                    self.tima = val;
                }
            }
            0xFF07 => {
                let prev = Self::signal_with(self.div, self.tac);
                self.tac = val & 0x07;
                let new = Self::signal_with(self.div, self.tac);
                if prev && !new {
                    self.increment();
                }
                self.last_signal = new;
            }
            _ => {}
        }
    }
}
