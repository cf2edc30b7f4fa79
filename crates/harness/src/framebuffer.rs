//! Raster readback: a heap window decoded into RGB pixels, written as PPM.

use std::io::Write;
use std::path::Path;

use rvfleet_common::{FramebufferConfig, PixelFormat};
use rvfleet_kernel::Processor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("framebuffer window {address:#010x}+{len:#x} does not fit the heap region")]
    OutsideHeap { address: u32, len: u64 },
    #[error("cannot build RGB pixels from {channels} channels")]
    UnsupportedChannels { channels: u32 },
}

/// Eight-bit RGB pixels, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbImage {
    /// Binary PPM (`P6`) encoding.
    pub fn to_ppm(&self) -> Vec<u8> {
        let mut out = format!("P6\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    pub fn write_ppm(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        file.write_all(&self.to_ppm())?;
        file.flush()
    }
}

fn channel_value(format: PixelFormat, bytes: &[u8]) -> u8 {
    match format {
        PixelFormat::Rgb8 => bytes[0],
        PixelFormat::F32Le => {
            let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            // NaN casts to 0.
            (v * 255.0).round().clamp(0.0, 255.0) as u8
        }
        PixelFormat::LegacyBeU32 => {
            let v = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (v as f32 * 255.0) as u8
        }
    }
}

/// Decode `raw` as `width * height` pixels of `channels` channels each.
///
/// One channel is read as gray, three as RGB, four as RGBA with alpha
/// dropped.
pub fn decode_pixels(config: &FramebufferConfig, raw: &[u8]) -> Result<RgbImage, ExtractError> {
    let channels = config.channels as usize;
    if !matches!(channels, 1 | 3 | 4) {
        return Err(ExtractError::UnsupportedChannels {
            channels: config.channels,
        });
    }
    let step = config.format.bytes_per_channel() as usize;
    let pixel_count = config.width as usize * config.height as usize;

    let mut pixels = Vec::with_capacity(pixel_count * 3);
    for pixel in raw.chunks_exact(channels * step).take(pixel_count) {
        let value = |c: usize| channel_value(config.format, &pixel[c * step..(c + 1) * step]);
        if channels == 1 {
            let gray = value(0);
            pixels.extend_from_slice(&[gray; 3]);
        } else {
            pixels.extend_from_slice(&[value(0), value(1), value(2)]);
        }
    }
    Ok(RgbImage {
        width: config.width,
        height: config.height,
        pixels,
    })
}

/// Read the framebuffer an instance published through its heap-start field.
///
/// `None` when the field was never set.
pub fn extract(
    processor: &Processor,
    config: &FramebufferConfig,
) -> Option<Result<RgbImage, ExtractError>> {
    let address = processor.bus().host_mapped().start_heap();
    if address == 0 {
        return None;
    }
    let len = config.window_bytes();
    let heap = processor.bus().memory().heap();
    let raw = u32::try_from(len)
        .ok()
        .and_then(|len32| heap.slice(address, len32));
    Some(match raw {
        Some(raw) => decode_pixels(config, raw),
        None => Err(ExtractError::OutsideHeap { address, len }),
    })
}
