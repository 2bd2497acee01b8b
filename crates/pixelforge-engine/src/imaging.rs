use std::io::Cursor;

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

/// Longest edge the transform path sends to the remote model.
pub const MAX_WORKING_EDGE: u32 = 768;
/// The remote model only accepts edges divisible by this.
pub const DIMENSION_MULTIPLE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("image {width}x{height} is too small: edges shrink to {floored_width}x{floored_height} after flooring to a multiple of 8")]
pub struct InvalidDimensions {
    pub width: u32,
    pub height: u32,
    pub floored_width: u32,
    pub floored_height: u32,
}

pub fn floor_to_multiple_of_8(value: u32) -> u32 {
    (value / DIMENSION_MULTIPLE) * DIMENSION_MULTIPLE
}

pub fn capped_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= MAX_WORKING_EDGE {
        return (width, height);
    }
    let ratio = MAX_WORKING_EDGE as f64 / longest as f64;
    (
        (width as f64 * ratio) as u32,
        (height as f64 * ratio) as u32,
    )
}

pub fn working_dimensions(width: u32, height: u32) -> Result<(u32, u32), InvalidDimensions> {
    let (capped_width, capped_height) = capped_dimensions(width, height);
    let floored = (
        floor_to_multiple_of_8(capped_width),
        floor_to_multiple_of_8(capped_height),
    );
    if floored.0 == 0 || floored.1 == 0 {
        return Err(InvalidDimensions {
            width,
            height,
            floored_width: floored.0,
            floored_height: floored.1,
        });
    }
    Ok(floored)
}

/// Linear blend `init * (1 - strength) + synthesized * strength` per 8-bit
/// channel. The result has `init`'s dimensions; `synthesized` is resampled
/// when it differs. Alpha is kept only when `init` has it.
pub fn blend(init: &DynamicImage, synthesized: &DynamicImage, strength: f32) -> DynamicImage {
    let (width, height) = init.dimensions();
    let resized;
    let synthesized = if synthesized.dimensions() == (width, height) {
        synthesized
    } else {
        resized = synthesized.resize_exact(width, height, FilterType::Lanczos3);
        &resized
    };
    let strength = strength.clamp(0.0, 1.0);

    if init.color().has_alpha() {
        let mut out = init.to_rgba8();
        blend_channels(&mut out, &synthesized.to_rgba8(), strength);
        DynamicImage::ImageRgba8(out)
    } else {
        let mut out = init.to_rgb8();
        blend_channels(&mut out, &synthesized.to_rgb8(), strength);
        DynamicImage::ImageRgb8(out)
    }
}

fn blend_channels(base: &mut [u8], overlay: &[u8], strength: f32) {
    for (dst, src) in base.iter_mut().zip(overlay.iter()) {
        *dst = blend_channel(*dst, *src, strength);
    }
}

pub fn blend_channel(base: u8, overlay: u8, strength: f32) -> u8 {
    let mixed = f32::from(base) * (1.0 - strength) + f32::from(overlay) * strength;
    mixed.round().clamp(0.0, 255.0) as u8
}

pub fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes)
}

pub fn decode_image(bytes: &[u8]) -> anyhow::Result<DynamicImage> {
    image::load_from_memory(bytes).context("failed to decode image")
}

const WATERMARK_MARGIN: u32 = 10;
const WATERMARK_PADDING: u32 = 5;
const WATERMARK_SCALE: u32 = 2;
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const BACKING: Rgba<u8> = Rgba([0, 0, 0, 128]);
const INK: Rgba<u8> = Rgba([255, 255, 255, 200]);

pub fn add_watermark(image: &DynamicImage, text: &str) -> DynamicImage {
    let mut canvas = image.to_rgba8();
    let (width, height) = canvas.dimensions();
    let glyph_count = text.chars().count() as u32;
    let advance = (GLYPH_WIDTH + 1) * WATERMARK_SCALE;
    let text_width = (glyph_count * advance).saturating_sub(WATERMARK_SCALE);
    let text_height = GLYPH_HEIGHT * WATERMARK_SCALE;

    let left = width.saturating_sub(text_width + WATERMARK_MARGIN);
    let top = height.saturating_sub(text_height + WATERMARK_MARGIN);

    fill_rect(
        &mut canvas,
        left.saturating_sub(WATERMARK_PADDING),
        top.saturating_sub(WATERMARK_PADDING),
        left + text_width + WATERMARK_PADDING,
        top + text_height + WATERMARK_PADDING,
        BACKING,
    );
    for (idx, ch) in text.chars().enumerate() {
        let origin_x = left + idx as u32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let x0 = origin_x + col * WATERMARK_SCALE;
                let y0 = top + row as u32 * WATERMARK_SCALE;
                fill_rect(
                    &mut canvas,
                    x0,
                    y0,
                    x0 + WATERMARK_SCALE,
                    y0 + WATERMARK_SCALE,
                    INK,
                );
            }
        }
    }

    if image.color().has_alpha() {
        DynamicImage::ImageRgba8(canvas)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
    }
}

fn fill_rect(canvas: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    let alpha = f32::from(color[3]) / 255.0;
    for y in y0..y1.min(height) {
        for x in x0..x1.min(width) {
            let pixel = canvas.get_pixel_mut(x, y);
            for channel in 0..3 {
                pixel[channel] = blend_channel(pixel[channel], color[channel], alpha);
            }
            let covered = f32::from(pixel[3]) + (255.0 - f32::from(pixel[3])) * alpha;
            pixel[3] = covered.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// 3x5 bitmap rows, most significant of the low three bits on the left.
fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b110, 0b001, 0b010, 0b100, 0b111],
        '3' => [0b110, 0b001, 0b010, 0b001, 0b110],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b110, 0b001, 0b110],
        '6' => [0b011, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b110],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        '?' => [0b110, 0b001, 0b010, 0b000, 0b010],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        _ => [0; 5],
    }
}
