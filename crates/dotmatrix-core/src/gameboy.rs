use crate::{
    cartridge::Cartridge, cpu::Cpu, error::EmuError, hardware::Model, joypad::Button, mmu::Mmu,
};

/// M-cycles in one frame slice of `run_frame`.
pub const FRAME_M_CYCLES: u32 = 17_564;

/// Receives the interleaved stereo buffer each time the APU fills it.
pub type AudioCallback = Box<dyn FnMut(&[f32]) + Send>;

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    model: Model,
    audio_callback: Option<AudioCallback>,
}

impl GameBoy {
    /// Build a machine around `rom`. Without a boot ROM the CPU and I/O start
    /// in their post-boot state; with one, execution begins at 0x0000.
    /// `model` defaults to what the cartridge header advertises.
    pub fn load(
        rom: Vec<u8>,
        boot_rom: Option<Vec<u8>>,
        model: Option<Model>,
    ) -> Result<Self, EmuError> {
        let model = model.unwrap_or_else(|| Model::detect(&rom));
        let cart = Cartridge::load(rom)?;
        let cgb = model.is_cgb();

        let (cpu, mut mmu) = match boot_rom {
            Some(boot) => {
                let mut mmu = Mmu::new_power_on(cgb);
                mmu.load_boot_rom(boot)?;
                (Cpu::new_power_on(), mmu)
            }
            None => (Cpu::new_with_mode(cgb), Mmu::new_with_mode(cgb)),
        };
        mmu.load_cart(cart);

        Ok(Self {
            cpu,
            mmu,
            model,
            audio_callback: None,
        })
    }

    pub fn with_audio_callback(mut self, callback: AudioCallback) -> Self {
        self.audio_callback = Some(callback);
        self
    }

    pub fn set_audio_callback(&mut self, callback: AudioCallback) {
        self.audio_callback = Some(callback);
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Rebuild CPU and memory state, keeping the cartridge, the boot ROM and
    /// the diagnostic sink.
    pub fn reset(&mut self) {
        let cgb = self.model.is_cgb();
        let cart = self.mmu.cart.take();
        let boot_rom = self.mmu.boot_rom.take();
        let sink = self.mmu.take_diagnostic_sink();

        let (cpu, mut mmu) = match boot_rom {
            Some(boot) => {
                let mut mmu = Mmu::new_power_on(cgb);
                mmu.boot_rom = Some(boot);
                mmu.boot_mapped = true;
                (Cpu::new_power_on(), mmu)
            }
            None => (Cpu::new_with_mode(cgb), Mmu::new_with_mode(cgb)),
        };
        if let Some(mut cart) = cart {
            cart.reset_banks();
            mmu.load_cart(cart);
        }
        mmu.set_diagnostic_sink(sink);
        self.cpu = cpu;
        self.mmu = mmu;
    }

    /// Execute one instruction and return its M-cycle cost.
    pub fn step_cpu(&mut self) -> Result<u8, EmuError> {
        self.cpu.step(&mut self.mmu)
    }

    pub fn tick_peripherals(&mut self, m_cycles: u8) {
        self.mmu.tick_peripherals(m_cycles);
    }

    pub fn tick_ppu(&mut self) {
        self.mmu.tick_ppu();
    }

    /// Advance the APU one dot, handing a full buffer to the audio callback.
    pub fn tick_apu(&mut self) {
        if self.mmu.tick_apu()
            && let Some(callback) = self.audio_callback.as_mut()
        {
            callback(self.mmu.apu.samples());
        }
    }

    /// Run CPU steps until at least `FRAME_M_CYCLES` have elapsed.
    /// Returns the M-cycles actually consumed.
    pub fn run_frame(&mut self) -> Result<u32, EmuError> {
        let mut elapsed = 0u32;
        while elapsed < FRAME_M_CYCLES {
            let m_cycles = self.step_cpu()?;
            self.tick_peripherals(m_cycles);
            for _ in 0..m_cycles as u32 * 4 {
                self.tick_ppu();
                self.tick_apu();
            }
            elapsed += m_cycles as u32;
        }
        Ok(elapsed)
    }

    /// 160x144 RGBA8 pixels.
    pub fn framebuffer(&self) -> &[u8] {
        self.mmu.ppu.framebuffer()
    }

    /// Interleaved stereo samples gathered since the buffer last filled.
    pub fn audio_samples(&self) -> &[f32] {
        self.mmu.apu.samples()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.set_button(button, pressed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_program(program: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x100..0x100 + program.len()].copy_from_slice(program);
        rom
    }

    #[test]
    fn load_uses_header_model() {
        let mut rom = rom_with_program(&[]);
        rom[0x143] = 0x80;
        let gb = GameBoy::load(rom, None, None).unwrap();
        assert_eq!(gb.model(), Model::Cgb);
        assert_eq!(gb.cpu.a, 0x11);
    }

    #[test]
    fn reset_restores_post_boot_registers() {
        // JP 0x0150
        let mut gb = GameBoy::load(rom_with_program(&[0xC3, 0x50, 0x01]), None, None).unwrap();
        gb.step_cpu().unwrap();
        assert_eq!(gb.cpu.pc, 0x0150);
        gb.reset();
        assert_eq!(gb.cpu.pc, 0x0100);
        assert!(gb.mmu.cart.is_some());
    }
}
