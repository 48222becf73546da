//! Headless capture: PNG screenshots of the console screen and WAV dumps
//! of the sound it played.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::Path;

use gba_console::Screen;
use gba_console::screen::{HEIGHT, WIDTH};

/// Encode the visible screen as a PNG into `out`.
///
/// # Errors
///
/// Returns an error if the encoder fails or `out` cannot be written.
pub fn encode_png<W: Write>(screen: &Screen, out: W) -> Result<(), Box<dyn Error>> {
    let mut encoder = png::Encoder::new(out, WIDTH as u32, HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;

    // ARGB32 → RGBA bytes
    let mut rgba = Vec::with_capacity(WIDTH * HEIGHT * 4);
    for pixel in screen.to_argb() {
        rgba.push(((pixel >> 16) & 0xFF) as u8);
        rgba.push(((pixel >> 8) & 0xFF) as u8);
        rgba.push((pixel & 0xFF) as u8);
        rgba.push(0xFF);
    }

    writer.write_image_data(&rgba)?;
    Ok(())
}

/// Save the console screen as a PNG file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn save_screenshot(screen: &Screen, path: &Path) -> Result<(), Box<dyn Error>> {
    let file = fs::File::create(path)?;
    encode_png(screen, std::io::BufWriter::new(file))
}

/// Save signed 8-bit samples as a mono 16-bit WAV file.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn save_audio(samples: &[i8], sample_rate: u32, path: &Path) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(i16::from(sample) << 8)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_screen_encodes_as_a_full_size_png() {
        let mut buf = Vec::new();
        encode_png(&Screen::new(), &mut buf).expect("encodes");
        assert_eq!(&buf[1..4], b"PNG");

        let decoder = png::Decoder::new(buf.as_slice());
        let reader = decoder.read_info().expect("valid png");
        let info = reader.info();
        assert_eq!((info.width, info.height), (240, 160));
    }
}
