//! Compressed still image to RGBA8 pixel buffer.
//!
//! Orientation: buffers are always top-left origin (row 0 is the top of the
//! picture), which is what the `image` decoders produce. Consumers with a
//! bottom-left origin (GL textures) read rows through
//! [`PixelBuffer::rows_bottom_up`]. The pipeline itself never flips.

use crate::errors::ImageError;
use image::{ColorType, ImageDecoder, ImageReader, Limits};
use std::collections::VecDeque;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

const RGBA_CHANNELS: usize = 4;

/// Number of recently produced buffers kept for reuse. Two covers the
/// steady state: one held by the consumer, one free.
const RECYCLE_DEPTH: usize = 2;

/// Largest accepted width or height. Fits 4K and 8K frames.
pub const MAX_DIMENSION: u32 = 8192;

/// Upper bound on memory one decode may claim, RGBA output included.
pub const MAX_DECODE_BYTES: u64 = 256 * 1024 * 1024;

/// Header dimensions are untrusted: bound them before anything is allocated.
fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_BYTES);
    limits
}

/// Validate header sizes and return the native decode length.
fn checked_decode_len(width: u32, height: u32, native_bytes: u64) -> Result<usize, ImageError> {
    let rgba_bytes = u64::from(width) * u64::from(height) * RGBA_CHANNELS as u64;
    if width > MAX_DIMENSION
        || height > MAX_DIMENSION
        || rgba_bytes > MAX_DECODE_BYTES
        || native_bytes > MAX_DECODE_BYTES
    {
        return Err(ImageError::TooLarge { width, height });
    }
    usize::try_from(native_bytes).map_err(|_| ImageError::TooLarge { width, height })
}

/// Decoded image, RGBA8, tightly packed, top-left origin.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    fn allocate(width: u32, height: u32) -> Result<Self, ImageError> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(RGBA_CHANNELS))
            .ok_or(ImageError::TooLarge { width, height })?;

        Ok(Self {
            width,
            height,
            pixels: vec![0u8; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_rgba(&self) -> &[u8] {
        &self.pixels
    }

    pub fn stride(&self) -> usize {
        self.width as usize * RGBA_CHANNELS
    }

    /// Row `y`, counted from the top.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride();
        Some(&self.pixels[start..start + self.stride()])
    }

    /// RGBA value at (`x`, `y`), top-left origin.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let i = x as usize * RGBA_CHANNELS;
        Some([row[i], row[i + 1], row[i + 2], row[i + 3]])
    }

    pub fn rows_top_down(&self) -> impl Iterator<Item = &[u8]> {
        self.pixels.chunks_exact(self.stride())
    }

    pub fn rows_bottom_up(&self) -> impl Iterator<Item = &[u8]> {
        self.pixels.chunks_exact(self.stride()).rev()
    }

    fn has_dimensions(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decodes images into [`PixelBuffer`]s, recycling allocations when the
/// dimensions stay the same.
#[derive(Default)]
pub struct ImagePipeline {
    recent: VecDeque<Arc<PixelBuffer>>,
    scratch: Vec<u8>,
    allocations: u64,
}

impl ImagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh buffer allocations performed so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn to_pixel_buffer(&mut self, bytes: &[u8]) -> Result<Arc<PixelBuffer>, ImageError> {
        let _s = common::span_debug!("to_pixel_buffer");

        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        reader.limits(decode_limits());
        let decoder = reader.into_decoder()?;

        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::EmptyImage);
        }

        let color = decoder.color_type();
        let native_len = checked_decode_len(width, height, decoder.total_bytes())?;

        let mut buffer = self.reusable_buffer(width, height)?;

        if color == ColorType::Rgba8 {
            decoder.read_image(&mut buffer.pixels)?;
        } else {
            self.scratch.resize(native_len, 0);
            decoder.read_image(&mut self.scratch)?;
            expand_to_rgba(color, &self.scratch, &mut buffer.pixels)?;
        }

        let buffer = Arc::new(buffer);
        self.recent.push_back(Arc::clone(&buffer));
        while self.recent.len() > RECYCLE_DEPTH {
            self.recent.pop_front();
        }

        Ok(buffer)
    }

    /// Take back a recent buffer nobody else holds, or allocate.
    fn reusable_buffer(&mut self, width: u32, height: u32) -> Result<PixelBuffer, ImageError> {
        let free = self
            .recent
            .iter()
            .position(|b| Arc::strong_count(b) == 1 && b.has_dimensions(width, height));

        if let Some(index) = free
            && let Some(shared) = self.recent.remove(index)
        {
            match Arc::try_unwrap(shared) {
                Ok(buffer) => return Ok(buffer),
                Err(shared) => self.recent.push_back(shared),
            }
        }

        self.allocations += 1;
        tracing::debug!(width, height, "Allocating pixel buffer");
        PixelBuffer::allocate(width, height)
    }
}

fn sample_u8(s: &[u8]) -> u8 {
    s[0]
}

fn sample_u16(s: &[u8]) -> u8 {
    (u16::from_ne_bytes([s[0], s[1]]) >> 8) as u8
}

fn sample_f32(s: &[u8]) -> u8 {
    let v = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Coerce any supported native layout into RGBA8.
fn expand_to_rgba(color: ColorType, src: &[u8], dst: &mut [u8]) -> Result<(), ImageError> {
    let channels = color.channel_count() as usize;
    let pixel_bytes = color.bytes_per_pixel() as usize;
    if channels == 0 || pixel_bytes % channels != 0 {
        return Err(ImageError::UnsupportedColor(format!("{:?}", color)));
    }

    let sample_bytes = pixel_bytes / channels;
    let read: fn(&[u8]) -> u8 = match sample_bytes {
        1 => sample_u8,
        2 => sample_u16,
        4 => sample_f32,
        _ => return Err(ImageError::UnsupportedColor(format!("{:?}", color))),
    };

    let has_color = color.has_color();
    let has_alpha = color.has_alpha();

    for (px, out) in src
        .chunks_exact(pixel_bytes)
        .zip(dst.chunks_exact_mut(RGBA_CHANNELS))
    {
        let sample = |i: usize| read(&px[i * sample_bytes..(i + 1) * sample_bytes]);

        let (r, g, b) = if has_color {
            (sample(0), sample(1), sample(2))
        } else {
            let l = sample(0);
            (l, l, l)
        };
        let a = if has_alpha {
            sample(channels - 1)
        } else {
            u8::MAX
        };

        out.copy_from_slice(&[r, g, b, a]);
    }

    Ok(())
}
