/// Burn labelled candidate rectangles into a copy of a screenshot.
///
/// Each candidate gets a coloured outline and its short label drawn in a dark
/// tag above the top-left corner, so a VLM can answer with the label alone.
use image::DynamicImage;

use crate::perception::types::BoundingBox;

/// Outline colours, cycled by candidate index.
const PALETTE: [[u8; 4]; 6] = [
    [255, 68, 68, 230],  // red
    [68, 200, 68, 230],  // green
    [68, 110, 255, 230], // blue
    [255, 170, 0, 230],  // orange
    [255, 68, 255, 230], // magenta
    [0, 200, 220, 230],  // cyan
];

/// Draw every `(label, box)` onto a copy of `src`.
///
/// On high-resolution images (width > 1600) labels are drawn at 2× scale so
/// they stay legible after the model-side downscale.
pub fn annotate_candidates(src: &DynamicImage, candidates: &[(String, BoundingBox)]) -> DynamicImage {
    let mut canvas = src.to_rgba8();
    let (w, _) = canvas.dimensions();

    let label_scale: u32 = if w > 1600 { 3 } else { 2 };
    let box_thickness: i32 = if w > 1600 { 3 } else { 2 };

    for (idx, (label, b)) in candidates.iter().enumerate() {
        let col = PALETTE[idx % PALETTE.len()];
        let (x1, y1) = (b.x, b.y);
        let (x2, y2) = (b.right() as i32 - 1, b.bottom() as i32 - 1);

        draw_rect(&mut canvas, x1, y1, x2, y2, col, box_thickness);

        let label_h_px = (5 * label_scale + 4 * label_scale) as i32;
        // Put the tag above the box; inside it when the box touches the top edge.
        let tag_y = if y1 - label_h_px >= 0 { y1 - label_h_px } else { y1.max(0) };
        draw_label_bg(&mut canvas, x1.max(0), tag_y, label, col, label_scale);
    }

    DynamicImage::ImageRgba8(canvas)
}

// ── Drawing primitives ──────────────────────────────────────────────────────

fn draw_rect(
    canvas: &mut image::RgbaImage,
    x1: i32, y1: i32, x2: i32, y2: i32,
    col: [u8; 4],
    thickness: i32,
) {
    let (w, h) = canvas.dimensions();
    let (iw, ih) = (w as i32, h as i32);

    for t in 0..thickness {
        let ty = y1 + t;
        let by = y2 - t;
        for x in x1.max(0)..=x2.min(iw - 1) {
            if ty >= 0 && ty < ih { set_pixel(canvas, x as u32, ty as u32, col); }
            if by >= 0 && by < ih { set_pixel(canvas, x as u32, by as u32, col); }
        }
    }
    for t in 0..thickness {
        let lx = x1 + t;
        let rx = x2 - t;
        for y in y1.max(0)..=y2.min(ih - 1) {
            if lx >= 0 && lx < iw { set_pixel(canvas, lx as u32, y as u32, col); }
            if rx >= 0 && rx < iw { set_pixel(canvas, rx as u32, y as u32, col); }
        }
    }
}

fn draw_label_bg(
    canvas: &mut image::RgbaImage,
    x: i32, y: i32,
    text: &str,
    col: [u8; 4],
    scale: u32,
) {
    let (w, h) = canvas.dimensions();
    let step = 5 * scale + scale; // glyph width + gap
    let pad = 2 * scale;
    let label_w = text.chars().count() as u32 * step + pad * 2;
    let label_h = 5 * scale + pad * 2;
    let (x, y) = (x.max(0) as u32, y.max(0) as u32);

    for dy in 0..label_h {
        for dx in 0..label_w {
            let (px, py) = (x + dx, y + dy);
            if px < w && py < h {
                let p = canvas.get_pixel_mut(px, py);
                p[0] = (p[0] as f32 * 0.15) as u8;
                p[1] = (p[1] as f32 * 0.15) as u8;
                p[2] = (p[2] as f32 * 0.15) as u8;
                p[3] = 255;
            }
        }
    }

    let glyph_col = [col[0], col[1], col[2], 255];
    for (i, c) in text.to_uppercase().chars().enumerate() {
        let gx = x + pad + i as u32 * step;
        if gx + 5 * scale >= w { break; }
        draw_mini_glyph(canvas, c, gx, y + pad, glyph_col, scale);
    }
}

/// Minimal 5×5 font renderer with integer `scale`.
fn draw_mini_glyph(canvas: &mut image::RgbaImage, c: char, px: u32, py: u32, col: [u8; 4], scale: u32) {
    let glyph = match c {
        '0'..='9' => MINI_FONT[(c as u8 - b'0') as usize],
        'A'..='Z' => MINI_FONT[10 + (c as u8 - b'A') as usize],
        _ => return,
    };
    let (w, h) = canvas.dimensions();
    for (row, &bits) in glyph.iter().enumerate() {
        for bit in 0..5u32 {
            if (bits >> (4 - bit)) & 1 == 0 { continue; }
            for sy in 0..scale {
                for sx in 0..scale {
                    let x = px + bit * scale + sx;
                    let y = py + row as u32 * scale + sy;
                    if x < w && y < h {
                        set_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

fn set_pixel(canvas: &mut image::RgbaImage, x: u32, y: u32, col: [u8; 4]) {
    let p = canvas.get_pixel_mut(x, y);
    let a = col[3] as f32 / 255.0;
    p[0] = (p[0] as f32 * (1.0 - a) + col[0] as f32 * a).round() as u8;
    p[1] = (p[1] as f32 * (1.0 - a) + col[1] as f32 * a).round() as u8;
    p[2] = (p[2] as f32 * (1.0 - a) + col[2] as f32 * a).round() as u8;
    p[3] = 255;
}

/// 5×5 bitmap font (digits 0-9, letters A-Z).
const MINI_FONT: [[u8; 5]; 36] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01110, 0b10000, 0b10000, 0b10000, 0b01110], // C
    [0b11100, 0b10010, 0b10001, 0b10010, 0b11100], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01110, 0b10000, 0b10011, 0b10001, 0b01110], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b01110, 0b00100, 0b00100, 0b00100, 0b01110], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
];
