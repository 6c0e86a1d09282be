//! PNG backend for [`Scene`]s.
//!
//! Geographic coordinates map linearly onto the canvas: longitude to x,
//! latitude to y with north up. Labels use a built-in 3x5 digit font.

use crate::render::{Basemap, Color, DrawCommand, Scene};
use crate::types::{BoundingBox, GeoPoint};
use geo::{Contains, Coord, LineString, Point, Polygon};
use image::imageops::{self, FilterType};
use image::{ImageOutputFormat, Rgba, RgbaImage};
use std::collections::HashSet;
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Canvas size must be non-zero, got {0}x{1}")]
    EmptyCanvas(u32, u32),

    #[error("Scene extent is degenerate: {0:?}")]
    DegenerateExtent(BoundingBox),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, RasterError>;

const GLYPH_SCALE: u32 = 2;
const GLYPH_PADDING: u32 = 3;

// Rows of 3 bits, most significant bit on the left
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

struct Canvas {
    image: RgbaImage,
    extent: BoundingBox,
}

impl Canvas {
    fn project(&self, p: &GeoPoint) -> (f64, f64) {
        let (w, h) = self.image.dimensions();
        let x = (p.lon - self.extent.lon_min) / self.extent.width() * w as f64;
        let y = (self.extent.lat_max - p.lat) / self.extent.height() * h as f64;
        (x, y)
    }

    fn blend(&mut self, x: i64, y: i64, color: Color, alpha: f32) {
        let (w, h) = self.image.dimensions();
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            return;
        }
        let a = alpha.clamp(0.0, 1.0);
        let px = self.image.get_pixel_mut(x as u32, y as u32);
        let mix = |dst: u8, src: u8| (src as f32 * a + dst as f32 * (1.0 - a)).round() as u8;
        *px = Rgba([
            mix(px[0], color.r),
            mix(px[1], color.g),
            mix(px[2], color.b),
            255,
        ]);
    }

    fn draw_basemap(&mut self, basemap: &Basemap) {
        let (x0, y0) = self.project(&GeoPoint::new(basemap.extent.lon_min, basemap.extent.lat_max));
        let (x1, y1) = self.project(&GeoPoint::new(basemap.extent.lon_max, basemap.extent.lat_min));
        let (w, h) = self.image.dimensions();
        let (src_w, src_h) = basemap.image.dimensions();
        if !(x1 - x0 >= 1.0 && y1 - y0 >= 1.0) || src_w == 0 || src_h == 0 {
            return;
        }

        // Only the part of the basemap that lands on the canvas is resampled
        let left = x0.max(0.0);
        let right = x1.min(w as f64);
        let top = y0.max(0.0);
        let bottom = y1.min(h as f64);
        let dest_w = (right - left).round();
        let dest_h = (bottom - top).round();
        if dest_w < 1.0 || dest_h < 1.0 {
            return;
        }

        let scale_x = src_w as f64 / (x1 - x0);
        let scale_y = src_h as f64 / (y1 - y0);
        let crop_x = ((left - x0) * scale_x).floor().clamp(0.0, (src_w - 1) as f64) as u32;
        let crop_y = ((top - y0) * scale_y).floor().clamp(0.0, (src_h - 1) as f64) as u32;
        let crop_right = ((right - x0) * scale_x).ceil().clamp(crop_x as f64 + 1.0, src_w as f64) as u32;
        let crop_bottom = ((bottom - y0) * scale_y).ceil().clamp(crop_y as f64 + 1.0, src_h as f64) as u32;

        let visible = imageops::crop_imm(
            basemap.image.as_ref(),
            crop_x,
            crop_y,
            crop_right - crop_x,
            crop_bottom - crop_y,
        )
        .to_image();
        let scaled = imageops::resize(&visible, dest_w as u32, dest_h as u32, FilterType::Triangle);
        imageops::overlay(&mut self.image, &scaled, left.round() as i64, top.round() as i64);
    }

    fn fill_polygon(&mut self, ring: &[GeoPoint], color: Color, alpha: f32) {
        let projected: Vec<(f64, f64)> = ring.iter().map(|p| self.project(p)).collect();
        if projected.len() < 4 {
            return;
        }
        let polygon = Polygon::new(
            LineString::from(projected.iter().map(|&(x, y)| Coord { x, y }).collect::<Vec<_>>()),
            vec![],
        );

        let (w, h) = self.image.dimensions();
        let min_x = projected.iter().map(|p| p.0).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
        let max_x = projected.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max).ceil().min(w as f64) as i64;
        let min_y = projected.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
        let max_y = projected.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).ceil().min(h as f64) as i64;

        for y in min_y..max_y {
            for x in min_x..max_x {
                let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                if polygon.contains(&center) {
                    self.blend(x, y, color, alpha);
                }
            }
        }
    }

    fn stroke(&mut self, points: &[GeoPoint], color: Color, alpha: f32, width: f32) {
        let radius = (width as f64 / 2.0).max(0.5);
        let projected: Vec<(f64, f64)> = points.iter().map(|p| self.project(p)).collect();

        // Collect coverage first so overlapping stamps blend once
        let mut covered: HashSet<(i64, i64)> = HashSet::new();
        for segment in projected.windows(2) {
            let (ax, ay) = segment[0];
            let (bx, by) = segment[1];
            let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            let steps = (length * 2.0).ceil().max(1.0) as usize;
            for i in 0..=steps {
                let t = i as f64 / steps as f64;
                stamp_disc(&mut covered, ax + (bx - ax) * t, ay + (by - ay) * t, radius);
            }
        }

        let mut pixels: Vec<(i64, i64)> = covered.into_iter().collect();
        pixels.sort_unstable();
        for (x, y) in pixels {
            self.blend(x, y, color, alpha);
        }
    }

    fn label(&mut self, position: &GeoPoint, text: &str, color: Color, background: Color, background_alpha: f32) {
        let digits: Vec<usize> = text
            .chars()
            .filter_map(|c| c.to_digit(10))
            .map(|d| d as usize)
            .collect();
        if digits.is_empty() {
            return;
        }

        let glyph_w = 3 * GLYPH_SCALE;
        let glyph_h = 5 * GLYPH_SCALE;
        let text_w = digits.len() as u32 * (glyph_w + GLYPH_SCALE) - GLYPH_SCALE;
        let box_w = (text_w + 2 * GLYPH_PADDING) as i64;
        let box_h = (glyph_h + 2 * GLYPH_PADDING) as i64;

        let (cx, cy) = self.project(position);
        let left = cx.round() as i64 - box_w / 2;
        let top = cy.round() as i64 - box_h / 2;

        for y in top..top + box_h {
            for x in left..left + box_w {
                self.blend(x, y, background, background_alpha);
            }
        }

        let origin_x = left + GLYPH_PADDING as i64;
        let origin_y = top + GLYPH_PADDING as i64;
        for (i, &digit) in digits.iter().enumerate() {
            let gx = origin_x + (i as u32 * (glyph_w + GLYPH_SCALE)) as i64;
            for (row, bits) in DIGITS[digit].iter().enumerate() {
                for col in 0..3u32 {
                    if bits & (0b100 >> col) == 0 {
                        continue;
                    }
                    for dy in 0..GLYPH_SCALE {
                        for dx in 0..GLYPH_SCALE {
                            let x = gx + (col * GLYPH_SCALE + dx) as i64;
                            let y = origin_y + (row as u32 * GLYPH_SCALE + dy) as i64;
                            self.blend(x, y, color, 1.0);
                        }
                    }
                }
            }
        }
    }
}

fn stamp_disc(covered: &mut HashSet<(i64, i64)>, cx: f64, cy: f64, radius: f64) {
    let min_x = (cx - radius).floor() as i64;
    let max_x = (cx + radius).ceil() as i64;
    let min_y = (cy - radius).floor() as i64;
    let max_y = (cy + radius).ceil() as i64;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= radius * radius {
                covered.insert((x, y));
            }
        }
    }
}

/// Draws every command of `scene`, back to front, onto a white canvas.
pub fn rasterize(scene: &Scene) -> Result<RgbaImage> {
    if scene.width == 0 || scene.height == 0 {
        return Err(RasterError::EmptyCanvas(scene.width, scene.height));
    }
    if !(scene.extent.width() > 0.0 && scene.extent.height() > 0.0) {
        return Err(RasterError::DegenerateExtent(scene.extent));
    }

    let mut canvas = Canvas {
        image: RgbaImage::from_pixel(scene.width, scene.height, Rgba([255, 255, 255, 255])),
        extent: scene.extent,
    };

    for command in &scene.commands {
        match command {
            DrawCommand::Basemap(basemap) => canvas.draw_basemap(basemap),
            DrawCommand::FilledPolygon { ring, color, alpha, .. } => canvas.fill_polygon(ring, *color, *alpha),
            DrawCommand::Label { position, text, color, background, background_alpha, .. } => {
                canvas.label(position, text, *color, *background, *background_alpha)
            }
            DrawCommand::Polyline { points, color, alpha, width, .. } => canvas.stroke(points, *color, *alpha, *width),
        }
    }

    Ok(canvas.image)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageOutputFormat::Png)?;
    Ok(bytes.into_inner())
}
