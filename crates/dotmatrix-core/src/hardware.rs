/// Console model being emulated.
///
/// The colour model adds VRAM/WRAM banking, colour palettes and VRAM DMA on
/// top of the monochrome feature set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Dmg,
    Cgb,
}

impl Model {
    /// Pick a model from the cartridge header's colour flag (0x143 bit 7).
    pub fn detect(rom: &[u8]) -> Self {
        if rom.get(0x0143).copied().unwrap_or(0) & 0x80 != 0 {
            Model::Cgb
        } else {
            Model::Dmg
        }
    }

    #[inline]
    pub const fn is_cgb(self) -> bool {
        matches!(self, Model::Cgb)
    }
}
