use crate::mmu::IoRegisters;

// 512 Hz frame sequencer tick
const FRAME_SEQUENCER_PERIOD: u32 = 8192;
// One stereo sample pair every 95 dots, roughly 44.1 kHz.
const SAMPLE_PERIOD: u32 = 95;
/// Length of the interleaved stereo buffer handed to the frontend.
pub const SAMPLE_BUFFER_LEN: usize = 1024;
/// Output rate the sample buffer is produced at.
pub const SAMPLE_RATE: u32 = 44_100;

// Duty table for pulse channels (CH1, CH2). Each entry is an 8-step
// waveform. Index (0..3) corresponds to duty selector in NRx1:
// 0 -> 00000001 (12.5%)
// 1 -> 10000001 (25%)
// 2 -> 10000111 (50%)
// 3 -> 01111110 (75%)
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

/// Behaviour shared by the four sound generators.
trait Channel {
    /// Advance the frequency timer by one dot.
    fn tick(&mut self);
    /// Restart the channel (NRx4 bit 7).
    fn trigger(&mut self);
    fn clock_length(&mut self);
    fn clock_envelope(&mut self) {}
    /// Current DAC input, 0..=15.
    fn output(&self) -> u8;
    fn is_enabled(&self) -> bool;
    fn dac_enabled(&self) -> bool;

    /// Output mapped onto -1.0..=1.0. A disabled DAC contributes silence.
    fn analog(&self) -> f32 {
        if !self.dac_enabled() {
            return 0.0;
        }
        self.output() as f32 / 7.5 - 1.0
    }
}

#[derive(Default, Clone, Copy)]
struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.period = val & 0x07;
        self.add = val & 0x08 != 0;
    }

    fn restart(&mut self) {
        self.volume = self.initial;
        self.timer = self.period;
    }
}

// Channel 1 frequency sweep.
#[derive(Default)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow.wrapping_add(delta)
        }
    }

    fn write(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn reload(&mut self, freq: u16) {
        self.shadow = freq;
        self.timer = if self.period == 0 { 8 } else { self.period };
        self.enabled = self.period != 0 || self.shift != 0;
    }
}

#[derive(Default)]
struct SquareChannel {
    enabled: bool,
    dac_enabled: bool,
    length: u16,
    length_enable: bool,
    duty: u8,
    duty_pos: u8,
    frequency: u16,
    timer: u32,
    envelope: Envelope,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    fn new(with_sweep: bool) -> Self {
        Self {
            sweep: with_sweep.then(Sweep::default),
            ..Default::default()
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    fn clock_sweep(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if sweep.timer > 0 {
            sweep.timer -= 1;
        }
        if sweep.timer != 0 {
            return;
        }
        sweep.timer = if sweep.period == 0 { 8 } else { sweep.period };
        if !sweep.enabled || sweep.period == 0 {
            return;
        }
        let new_freq = sweep.calculate();
        if new_freq > 2047 {
            self.enabled = false;
            return;
        }
        if sweep.shift != 0 {
            sweep.shadow = new_freq;
            self.frequency = new_freq;
            if sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }
}

impl Channel for SquareChannel {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.restart();
        let freq = self.frequency;
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.reload(freq);
            if sweep.shift != 0 && sweep.calculate() > 2047 {
                self.enabled = false;
            }
        }
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }
}

#[derive(Default)]
struct WaveChannel {
    enabled: bool,
    dac_enabled: bool,
    length: u16,
    length_enable: bool,
    volume: u8,
    position: u8,
    last_sample: u8,
    frequency: u16,
    timer: u32,
    ram: [u8; 0x10],
}

impl WaveChannel {
    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }
}

impl Channel for WaveChannel {
    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            self.position = (self.position + 1) & 0x1F;
            let byte = self.ram[(self.position / 2) as usize];
            self.last_sample = if self.position & 1 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            };
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 256;
        }
        self.timer = self.period();
        self.position = 0;
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        match self.volume {
            1 => self.last_sample,
            2 => self.last_sample >> 1,
            3 => self.last_sample >> 2,
            _ => 0,
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }
}

#[derive(Default)]
struct NoiseChannel {
    enabled: bool,
    dac_enabled: bool,
    length: u16,
    length_enable: bool,
    envelope: Envelope,
    clock_shift: u8,
    divisor: u8,
    width7: bool,
    lfsr: u16,
    timer: u32,
}

impl NoiseChannel {
    fn period(&self) -> u32 {
        let r = match self.divisor {
            0 => 8,
            d => d as u32 * 16,
        };
        r << self.clock_shift
    }
}

impl Channel for NoiseChannel {
    fn tick(&mut self) {
        if !self.enabled || self.clock_shift >= 14 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period();
            // Feedback is the XNOR of bits 0 and 1.
            let bit = !(self.lfsr ^ (self.lfsr >> 1)) & 1;
            self.lfsr >>= 1;
            self.lfsr |= bit << 14;
            if self.width7 {
                self.lfsr = (self.lfsr & !0x40) | (bit << 6);
            }
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length == 0 {
            self.length = 64;
        }
        self.timer = self.period();
        self.envelope.restart();
        self.lfsr = 0;
    }

    fn clock_length(&mut self) {
        if self.length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.lfsr & 1 == 0 {
            self.envelope.volume
        } else {
            0
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }
}

struct FrameSequencer {
    step: u8,
    counter: u32,
}

impl FrameSequencer {
    fn new() -> Self {
        Self {
            step: 0,
            counter: 0,
        }
    }

    /// Returns the step to clock when a 512 Hz edge is reached.
    fn tick(&mut self) -> Option<u8> {
        self.counter += 1;
        if self.counter < FRAME_SEQUENCER_PERIOD {
            return None;
        }
        self.counter = 0;
        let s = self.step;
        self.step = (self.step + 1) & 7;
        Some(s)
    }
}

pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    /// Raw NR10..NR52 values as last written.
    regs: [u8; 0x17],
    nr50: u8,
    nr51: u8,
    powered: bool,
    sequencer: FrameSequencer,
    sample_counter: u32,
    samples: Vec<f32>,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            regs: [0; 0x17],
            nr50: 0,
            nr51: 0,
            powered: false,
            sequencer: FrameSequencer::new(),
            sample_counter: 0,
            samples: Vec::with_capacity(SAMPLE_BUFFER_LEN),
        }
    }

    /// Register state left behind by the boot ROM.
    pub fn apply_boot_state(&mut self) {
        self.write_register(0xFF26, 0x80);
        self.write_register(0xFF24, 0x77);
        self.write_register(0xFF25, 0xF3);
    }

    /// Interleaved stereo samples produced since the buffer last filled.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    fn read_mask(addr: u16) -> u8 {
        match addr {
            0xFF10 => 0x80,
            0xFF11 => 0x3F,
            0xFF12 => 0x00,
            0xFF13 => 0xFF,
            0xFF14 => 0xBF,
            0xFF16 => 0x3F,
            0xFF17 => 0x00,
            0xFF18 => 0xFF,
            0xFF19 => 0xBF,
            0xFF1A => 0x7F,
            0xFF1B => 0xFF,
            0xFF1C => 0x9F,
            0xFF1D => 0xFF,
            0xFF1E => 0xBF,
            0xFF20 => 0xFF,
            0xFF21 => 0x00,
            0xFF22 => 0x00,
            0xFF23 => 0xBF,
            0xFF24 => 0x00,
            0xFF25 => 0x00,
            _ => 0xFF,
        }
    }

    fn power_off(&mut self) {
        let wave_ram = self.ch3.ram;
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3 = WaveChannel {
            ram: wave_ram,
            ..WaveChannel::default()
        };
        self.ch4 = NoiseChannel::default();
        self.regs.fill(0);
        self.nr50 = 0;
        self.nr51 = 0;
    }

    fn clock_frame_sequencer(&mut self, step: u8) {
        if step % 2 == 0 {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            self.ch1.clock_sweep();
        }
        if step == 7 {
            self.ch1.clock_envelope();
            self.ch2.clock_envelope();
            self.ch4.clock_envelope();
        }
    }

    fn mix(&self) -> (f32, f32) {
        let outputs = [
            self.ch1.analog(),
            self.ch2.analog(),
            self.ch3.analog(),
            self.ch4.analog(),
        ];
        let mut left = 0.0;
        let mut right = 0.0;
        for (i, out) in outputs.iter().enumerate() {
            if self.nr51 & (0x10 << i) != 0 {
                left += out;
            }
            if self.nr51 & (0x01 << i) != 0 {
                right += out;
            }
        }
        let left_vol = (((self.nr50 >> 4) & 0x07) + 1) as f32 / 8.0;
        let right_vol = ((self.nr50 & 0x07) + 1) as f32 / 8.0;
        (left / 4.0 * left_vol, right / 4.0 * right_vol)
    }

    /// Advance one dot. Returns true when the sample buffer has just filled.
    pub fn tick(&mut self) -> bool {
        if self.powered {
            if let Some(step) = self.sequencer.tick() {
                self.clock_frame_sequencer(step);
            }
            self.ch1.tick();
            self.ch2.tick();
            self.ch3.tick();
            self.ch4.tick();
        }

        self.sample_counter += 1;
        if self.sample_counter < SAMPLE_PERIOD {
            return false;
        }
        self.sample_counter = 0;
        if self.samples.len() >= SAMPLE_BUFFER_LEN {
            self.samples.clear();
        }
        let (left, right) = if self.powered {
            self.mix()
        } else {
            (0.0, 0.0)
        };
        self.samples.push(left);
        self.samples.push(right);
        self.samples.len() >= SAMPLE_BUFFER_LEN
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegisters for Apu {
    fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => {
                let mut val = if self.powered { 0xF0 } else { 0x70 };
                if self.ch1.is_enabled() {
                    val |= 0x01;
                }
                if self.ch2.is_enabled() {
                    val |= 0x02;
                }
                if self.ch3.is_enabled() {
                    val |= 0x04;
                }
                if self.ch4.is_enabled() {
                    val |= 0x08;
                }
                val
            }
            0xFF30..=0xFF3F => self.ch3.ram[(addr - 0xFF30) as usize],
            0xFF10..=0xFF25 => self.regs[(addr - 0xFF10) as usize] | Apu::read_mask(addr),
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, addr: u16, val: u8) {
        if (0xFF30..=0xFF3F).contains(&addr) {
            self.ch3.ram[(addr - 0xFF30) as usize] = val;
            return;
        }
        if addr == 0xFF26 {
            let on = val & 0x80 != 0;
            if self.powered && !on {
                self.power_off();
            } else if !self.powered && on {
                self.sequencer = FrameSequencer::new();
            }
            self.powered = on;
            return;
        }
        if !self.powered || !(0xFF10..=0xFF25).contains(&addr) {
            return;
        }
        self.regs[(addr - 0xFF10) as usize] = val;
        match addr {
            0xFF10 => {
                if let Some(sweep) = self.ch1.sweep.as_mut() {
                    sweep.write(val);
                }
            }
            0xFF11 => {
                self.ch1.duty = val >> 6;
                self.ch1.length = 64 - (val & 0x3F) as u16;
            }
            0xFF12 => {
                self.ch1.envelope.write(val);
                self.ch1.dac_enabled = val & 0xF8 != 0;
                if !self.ch1.dac_enabled {
                    self.ch1.enabled = false;
                }
            }
            0xFF13 => self.ch1.frequency = (self.ch1.frequency & 0x0700) | val as u16,
            0xFF14 => {
                self.ch1.frequency = (self.ch1.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
                self.ch1.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch1.trigger();
                }
            }
            0xFF16 => {
                self.ch2.duty = val >> 6;
                self.ch2.length = 64 - (val & 0x3F) as u16;
            }
            0xFF17 => {
                self.ch2.envelope.write(val);
                self.ch2.dac_enabled = val & 0xF8 != 0;
                if !self.ch2.dac_enabled {
                    self.ch2.enabled = false;
                }
            }
            0xFF18 => self.ch2.frequency = (self.ch2.frequency & 0x0700) | val as u16,
            0xFF19 => {
                self.ch2.frequency = (self.ch2.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
                self.ch2.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch2.trigger();
                }
            }
            0xFF1A => {
                self.ch3.dac_enabled = val & 0x80 != 0;
                if !self.ch3.dac_enabled {
                    self.ch3.enabled = false;
                }
            }
            0xFF1B => self.ch3.length = 256 - val as u16,
            0xFF1C => self.ch3.volume = (val >> 5) & 0x03,
            0xFF1D => self.ch3.frequency = (self.ch3.frequency & 0x0700) | val as u16,
            0xFF1E => {
                self.ch3.frequency = (self.ch3.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
                self.ch3.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch3.trigger();
                }
            }
            0xFF20 => self.ch4.length = 64 - (val & 0x3F) as u16,
            0xFF21 => {
                self.ch4.envelope.write(val);
                self.ch4.dac_enabled = val & 0xF8 != 0;
                if !self.ch4.dac_enabled {
                    self.ch4.enabled = false;
                }
            }
            0xFF22 => {
                self.ch4.clock_shift = val >> 4;
                self.ch4.width7 = val & 0x08 != 0;
                self.ch4.divisor = val & 0x07;
            }
            0xFF23 => {
                self.ch4.length_enable = val & 0x40 != 0;
                if val & 0x80 != 0 {
                    self.ch4.trigger();
                }
            }
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            _ => {}
        }
    }
}
