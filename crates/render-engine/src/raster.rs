//! Pixel operations used by the compositor.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use neoncut_project_model::ColorFilter;

use crate::filter::apply_filter;

/// Background of the end-of-timeline card.
pub const END_CARD_BACKGROUND: Rgba<u8> = Rgba([0x11, 0x11, 0x11, 255]);

/// Text drawn on the end-of-timeline card.
pub const END_CARD_TEXT: &str = "END";

/// Reference cap height of the end card text, in output pixels at 720p.
const END_CARD_TEXT_HEIGHT: f64 = 40.0;

pub fn blank_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
}

/// Multiply every pixel's alpha by `opacity`.
pub fn apply_opacity(image: &mut RgbaImage, opacity: f64) {
    if opacity >= 1.0 {
        return;
    }
    let opacity = opacity.max(0.0);
    for pixel in image.pixels_mut() {
        pixel.0[3] = (f64::from(pixel.0[3]) * opacity).round().clamp(0.0, 255.0) as u8;
    }
}

/// Draw `media` stretched to `scale` times the canvas size and centered,
/// with `filter` applied to the media layer and alpha multiplied by
/// `opacity`.
pub fn draw_media_layer(
    canvas: &mut RgbaImage,
    media: &RgbaImage,
    scale: f64,
    opacity: f64,
    filter: ColorFilter,
) {
    let (cw, ch) = canvas.dimensions();
    let (mw, mh) = media.dimensions();
    if mw == 0 || mh == 0 || scale <= 0.0 || opacity <= 0.0 {
        return;
    }

    let mut layer = if scale >= 1.0 {
        // Only the centered 1/scale window of the media lands on the canvas.
        let crop_w = (f64::from(mw) / scale).round().clamp(1.0, f64::from(mw)) as u32;
        let crop_h = (f64::from(mh) / scale).round().clamp(1.0, f64::from(mh)) as u32;
        let x = (mw - crop_w) / 2;
        let y = (mh - crop_h) / 2;
        let window = imageops::crop_imm(media, x, y, crop_w, crop_h).to_image();
        if window.dimensions() == (cw, ch) {
            window
        } else {
            imageops::resize(&window, cw, ch, FilterType::Triangle)
        }
    } else {
        let w = (f64::from(cw) * scale).round().max(1.0) as u32;
        let h = (f64::from(ch) * scale).round().max(1.0) as u32;
        imageops::resize(media, w, h, FilterType::Triangle)
    };

    apply_filter(&mut layer, filter);
    apply_opacity(&mut layer, opacity);

    let x = (i64::from(cw) - i64::from(layer.width())) / 2;
    let y = (i64::from(ch) - i64::from(layer.height())) / 2;
    imageops::overlay(canvas, &layer, x, y);
}

/// Draw `logo` resized to `width` x `height` at (`x`, `y`).
pub fn draw_logo(
    canvas: &mut RgbaImage,
    logo: &RgbaImage,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    opacity: f64,
) {
    let w = width.round() as u32;
    let h = height.round() as u32;
    if w == 0 || h == 0 || opacity <= 0.0 {
        return;
    }
    let mut layer = if logo.dimensions() == (w, h) {
        logo.clone()
    } else {
        imageops::resize(logo, w, h, FilterType::Triangle)
    };
    apply_opacity(&mut layer, opacity);
    imageops::overlay(canvas, &layer, x.round() as i64, y.round() as i64);
}

/// Fill the canvas with the end card.
pub fn draw_end_card(canvas: &mut RgbaImage) {
    for pixel in canvas.pixels_mut() {
        *pixel = END_CARD_BACKGROUND;
    }
    let (cw, ch) = canvas.dimensions();
    let cell = ((END_CARD_TEXT_HEIGHT * f64::from(ch) / 720.0) / GLYPH_ROWS as f64)
        .round()
        .max(1.0) as u32;
    draw_text_centered(canvas, END_CARD_TEXT, cw / 2, ch / 2, cell, Rgba([255, 255, 255, 255]));
}

const GLYPH_COLS: usize = 5;
const GLYPH_ROWS: usize = 7;

/// 5x7 bitmaps, one byte per row, high bit on the left.
fn glyph(c: char) -> Option<[u8; GLYPH_ROWS]> {
    let rows = match c.to_ascii_uppercase() {
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        ' ' => [0; GLYPH_ROWS],
        _ => return None,
    };
    Some(rows)
}

/// Draw block text centered on (`cx`, `cy`); each glyph dot is a
/// `cell` x `cell` square.
fn draw_text_centered(canvas: &mut RgbaImage, text: &str, cx: u32, cy: u32, cell: u32, color: Rgba<u8>) {
    let glyphs: Vec<[u8; GLYPH_ROWS]> = text.chars().filter_map(glyph).collect();
    if glyphs.is_empty() {
        return;
    }
    let advance = (GLYPH_COLS as u32 + 1) * cell;
    let text_w = advance * glyphs.len() as u32 - cell;
    let text_h = GLYPH_ROWS as u32 * cell;
    let left = i64::from(cx) - i64::from(text_w / 2);
    let top = i64::from(cy) - i64::from(text_h / 2);

    for (i, rows) in glyphs.iter().enumerate() {
        let gx = left + i64::from(advance) * i as i64;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - col)) == 0 {
                    continue;
                }
                fill_rect(
                    canvas,
                    gx + (col as u32 * cell) as i64,
                    top + (row as u32 * cell) as i64,
                    cell,
                    cell,
                    color,
                );
            }
        }
    }
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, color: Rgba<u8>) {
    let (cw, ch) = canvas.dimensions();
    let x0 = x.clamp(0, i64::from(cw)) as u32;
    let y0 = y.clamp(0, i64::from(ch)) as u32;
    let x1 = (x + i64::from(w)).clamp(0, i64::from(cw)) as u32;
    let y1 = (y + i64::from(h)).clamp(0, i64::from(ch)) as u32;
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.put_pixel(px, py, color);
        }
    }
}
