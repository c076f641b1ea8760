//! Drawing primitives shared by the annotated and bird's-eye renderers.

use anyhow::{Result, anyhow, bail};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use video_ingest::{Frame, FrameFormat};

use crate::geometry::Point;

/// Coordinates beyond this are not drawn; keeps line walks bounded.
const MAX_DRAW_COORD: f32 = 100_000.0;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Convert a captured BGR frame into an RGB image buffer.
pub fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    if !matches!(frame.format, FrameFormat::Bgr8) {
        bail!("unsupported frame format");
    }
    if frame.width <= 0 || frame.height <= 0 {
        bail!("frame has empty geometry {}x{}", frame.width, frame.height);
    }
    if frame.data.len() != frame.expected_len() {
        bail!(
            "unexpected frame buffer size: got {} bytes, expected {}",
            frame.data.len(),
            frame.expected_len()
        );
    }
    RgbImage::from_vec(
        frame.width as u32,
        frame.height as u32,
        bgr_to_rgb(&frame.data),
    )
    .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

/// Finite and close enough to any canvas to be worth drawing.
pub fn drawable(p: Point) -> bool {
    p.is_finite() && p.x.abs() < MAX_DRAW_COORD && p.y.abs() < MAX_DRAW_COORD
}

/// Straight line `thickness` pixels wide, drawn as parallel 1px strokes.
pub fn draw_thick_line(image: &mut RgbImage, from: Point, to: Point, thickness: u32, color: Rgb<u8>) {
    if !drawable(from) || !drawable(to) {
        return;
    }
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let len = (dx * dx + dy * dy).sqrt();
    let thickness = thickness.max(1);
    if len < f32::EPSILON {
        draw_dot(image, from, (thickness / 2) as i32, color);
        return;
    }

    let (nx, ny) = (-dy / len, dx / len);
    let half = (thickness - 1) as f32 / 2.0;
    for step in 0..thickness {
        let offset = step as f32 - half;
        draw_line_segment_mut(
            image,
            (from.x + nx * offset, from.y + ny * offset),
            (to.x + nx * offset, to.y + ny * offset),
            color,
        );
    }
}

/// Dashed line made of `dash` pixel strokes separated by `gap` pixels. A
/// trailing partial dash is not drawn.
pub fn draw_dashed_line(
    image: &mut RgbImage,
    from: (i32, i32),
    to: (i32, i32),
    thickness: u32,
    dash: i32,
    gap: i32,
    color: Rgb<u8>,
) {
    let (dx, dy) = ((to.0 - from.0) as f64, (to.1 - from.1) as f64);
    let total = (dx * dx + dy * dy).sqrt() as i32;
    let period = dash + gap;
    if total <= 0 || period <= 0 {
        return;
    }

    let at = |offset: i32| {
        let t = offset as f64 / total as f64;
        Point::new(
            (from.0 as f64 + dx * t).trunc() as f32,
            (from.1 as f64 + dy * t).trunc() as f32,
        )
    };
    for i in 0..total / period {
        let start = i * period;
        draw_thick_line(image, at(start), at(start + dash), thickness, color);
    }
}

/// Open polyline through `points` with rounded joints.
pub fn draw_polyline(image: &mut RgbImage, points: &[Point], thickness: u32, color: Rgb<u8>) {
    if points.len() == 1 {
        draw_dot(image, points[0], (thickness / 2) as i32, color);
        return;
    }
    for pair in points.windows(2) {
        draw_thick_line(image, pair[0], pair[1], thickness, color);
    }
    if thickness > 2 {
        for p in points {
            draw_dot(image, *p, (thickness / 2) as i32, color);
        }
    }
}

pub fn draw_dot(image: &mut RgbImage, center: Point, radius: i32, color: Rgb<u8>) {
    if !drawable(center) {
        return;
    }
    draw_filled_circle_mut(image, center.to_pixel(), radius.max(0), color);
}

/// Two pixel box outline from `[left, top, right, bottom]` corners.
pub fn draw_box(image: &mut RgbImage, corners: [f32; 4], color: Rgb<u8>) {
    let width = image.width() as f32;
    let height = image.height() as f32;
    if width < 1.0 || height < 1.0 || corners.iter().any(|v| !v.is_finite()) {
        return;
    }
    let left = corners[0].clamp(0.0, width - 1.0).round() as i32;
    let top = corners[1].clamp(0.0, height - 1.0).round() as i32;
    let right = corners[2].clamp(0.0, width - 1.0).round() as i32;
    let bottom = corners[3].clamp(0.0, height - 1.0).round() as i32;
    if right <= left || bottom <= top {
        return;
    }
    for inset in 0..2 {
        let w = (right - left - 2 * inset).max(1) as u32;
        let h = (bottom - top - 2 * inset).max(1) as u32;
        draw_hollow_rect_mut(
            image,
            Rect::at(left + inset, top + inset).of_size(w, h),
            color,
        );
    }
}

/// Pixel width of `text` rendered at `scale`.
pub fn label_width(text: &str, scale: i32) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE * scale.max(1)
}

/// Label over a translucent-looking dark backing strip.
pub fn draw_tag(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let scale = scale.max(1);
    fill_rect(
        image,
        x.saturating_sub(1),
        y.saturating_sub(1),
        x.saturating_add(label_width(text, scale)),
        y.saturating_add(GLYPH_HEIGHT * scale),
        Rgb([0, 0, 0]),
    );
    draw_label(image, x, y, text, scale, color);
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Render `text` with the built-in 5x7 font; unknown glyphs leave a gap.
pub fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let scale = scale.max(1);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        for sx in 0..scale {
                            let px = x.saturating_add(col * scale + sx);
                            let py = y.saturating_add(row as i32 * scale + sy);
                            if px >= 0 && px < width && py >= 0 && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
        if x >= width {
            break;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'J' => Some([
            0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'Q' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'X' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'Z' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        ':' => Some([0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
