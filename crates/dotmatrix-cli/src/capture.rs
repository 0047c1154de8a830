//! Headless capture: PNG screenshots and WAV audio dumps.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use dotmatrix_core::{SCREEN_HEIGHT, SCREEN_WIDTH, apu::SAMPLE_RATE};

use crate::CliError;

fn create_parent_dir(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Save an RGBA8 framebuffer as a PNG file.
pub fn save_screenshot(framebuffer: &[u8], path: &Path) -> Result<(), CliError> {
    create_parent_dir(path)?;
    let file = fs::File::create(path)?;
    let w = BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(framebuffer)?;
    Ok(())
}

/// Write interleaved stereo samples as a 16-bit WAV file.
pub fn save_wav(samples: &[f32], path: &Path) -> Result<(), CliError> {
    create_parent_dir(path)?;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(scaled)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;
    use tempfile::tempdir;

    #[test]
    fn screenshot_round_trips_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shots").join("frame.png");
        let fb = vec![0x80u8; SCREEN_WIDTH * SCREEN_HEIGHT * 4];
        save_screenshot(&fb, &path).unwrap();

        let decoder = png::Decoder::new(BufReader::new(fs::File::open(&path).unwrap()));
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        assert_eq!(info.width, SCREEN_WIDTH as u32);
        assert_eq!(info.height, SCREEN_HEIGHT as u32);
    }

    #[test]
    fn wav_scales_and_clamps_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        save_wav(&[0.0, 1.0, -2.0, 0.5], &path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44_100);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX, i16::MAX / 2]);
    }
}
