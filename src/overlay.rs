// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Frame annotation helpers used by the ingestion loop when a viewer is
//! attached and, optionally, for the debug FPS
//! overlay (step 7).
//!
//! Implemented as plain pixel operations on `image::RgbImage` rather than
//! pulling in a 2-D drawing crate: `image` alone is enough for this kind of
//! work, with no `imageproc`/font-rendering dependency needed.

use crate::config::Color;
use crate::geom::Vertex;
use crate::video::Frame;
use image::Rgb;

const COUNTED_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNCOUNTED_COLOR: Rgb<u8> = Rgb([200, 0, 200]);

/// Alpha-blends `color` over the interior of `polygon`.
pub fn draw_polygon_overlay(frame: &mut Frame, polygon: &[Vertex], color: Color, alpha: f32) {
    if polygon.len() < 3 {
        return;
    }
    let (width, height) = frame.dimensions();
    for y in 0..height {
        for x in 0..width {
            let point = ((x as f64) + 0.5, (y as f64) + 0.5);
            if crate::geom::contains(point, polygon) {
                blend_pixel(frame, x, y, color, alpha);
            }
        }
    }
}

fn blend_pixel(frame: &mut Frame, x: u32, y: u32, color: Color, alpha: f32) {
    let px = frame.get_pixel_mut(x, y);
    let Color(r, g, b) = color;
    px.0[0] = blend_channel(px.0[0], r, alpha);
    px.0[1] = blend_channel(px.0[1], g, alpha);
    px.0[2] = blend_channel(px.0[2], b, alpha);
}

fn blend_channel(base: u8, overlay: u8, alpha: f32) -> u8 {
    let blended = (base as f32) * (1.0 - alpha) + (overlay as f32) * alpha;
    blended.round().clamp(0.0, 255.0) as u8
}

/// Draws a filled circle at each track's centroid: green if `counted`,
/// magenta otherwise.
pub fn draw_track_markers(frame: &mut Frame, markers: &[(f64, f64, bool)], radius: u32) {
    let (width, height) = frame.dimensions();
    let r = radius.max(1) as i64;
    for &(cx, cy, counted) in markers {
        let color = if counted { COUNTED_COLOR } else { UNCOUNTED_COLOR };
        let (cx, cy) = (cx.round() as i64, cy.round() as i64);
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let (px, py) = (cx + dx, cy + dy);
                if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                    continue;
                }
                frame.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// 3x5 bitmap glyphs for digits and the handful of other characters the
/// FPS overlay needs, packed one bit per pixel row-major (bit 0 = top-left).
fn glyph(c: char) -> Option<[u8; 5]> {
    // Each element is a 3-bit row, MSB-first (left column first).
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        'F' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        ' ' => [0, 0, 0, 0, 0],
        _ => return None,
    })
}

/// Draws `text` near the top-left corner at the given pixel scale.
/// `scale` controls the size of each glyph "pixel" in frame pixels.
pub fn draw_text(frame: &mut Frame, text: &str, origin: (u32, u32), scale: u32, color: Color) {
    let scale = scale.max(1);
    let Color(r, g, b) = color;
    let pixel = Rgb([r, g, b]);
    let (width, height) = frame.dimensions();
    let (ox, oy) = origin;
    let mut cursor_x = ox;
    for c in text.chars() {
        let Some(rows) = glyph(c) else {
            cursor_x += 4 * scale;
            continue;
        };
        for (row_idx, row) in rows.iter().enumerate() {
            for col_idx in 0..3 {
                if row & (1 << (2 - col_idx)) == 0 {
                    continue;
                }
                let px0 = cursor_x + col_idx as u32 * scale;
                let py0 = oy + row_idx as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (px, py) = (px0 + dx, py0 + dy);
                        if px < width && py < height {
                            frame.put_pixel(px, py, pixel);
                        }
                    }
                }
            }
        }
        cursor_x += 4 * scale;
    }
}

/// Renders `fps` as `"FPS 12.3"` and draws it at the frame's top-left
/// corner.
pub fn draw_fps_overlay(frame: &mut Frame, fps: f64) {
    let text = format!("FPS {fps:.1}");
    draw_text(frame, &text, (4, 4), 2, Color(255, 255, 0));
}
