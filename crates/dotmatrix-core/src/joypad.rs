use crate::mmu::IoRegisters;

/// Buttons on the console, as seen by the P1 register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Line within its group (bit 0..3 of P1).
    fn line(self) -> u8 {
        match self {
            Button::Right | Button::A => 0x01,
            Button::Left | Button::B => 0x02,
            Button::Up | Button::Select => 0x04,
            Button::Down | Button::Start => 0x08,
        }
    }

    fn is_dpad(self) -> bool {
        matches!(self, Button::Right | Button::Left | Button::Up | Button::Down)
    }
}

/// P1/JOYP (0xFF00). Pressed lines read as 0.
pub struct Joypad {
    select: u8,
    dpad: u8,
    buttons: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            dpad: 0x0F,
            buttons: 0x0F,
        }
    }

    /// Update a button. Returns true on a released-to-pressed transition,
    /// which is when the joypad interrupt fires.
    pub fn set_button(&mut self, button: Button, pressed: bool) -> bool {
        let group = if button.is_dpad() {
            &mut self.dpad
        } else {
            &mut self.buttons
        };
        let was_pressed = *group & button.line() == 0;
        if pressed {
            *group &= !button.line();
        } else {
            *group |= button.line();
        }
        pressed && !was_pressed
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegisters for Joypad {
    fn read_register(&self, _addr: u16) -> u8 {
        let mut lines = 0x0F;
        if self.select & 0x10 == 0 {
            lines &= self.dpad;
        }
        if self.select & 0x20 == 0 {
            lines &= self.buttons;
        }
        0xC0 | self.select | lines
    }

    fn write_register(&mut self, _addr: u16, val: u8) {
        self.select = val & 0x30;
    }
}
