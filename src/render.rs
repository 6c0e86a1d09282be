use crate::config::AppConfig;
use crate::types::{BoundaryPolygon, BoundarySummary, BoundingBox, GeoPoint};
use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_PALETTE: [&str; 12] = [
    "#D62728", "#1F77B4", "#2CA02C", "#F37100", "#8931D1", "#81542C",
    "#A1991C", "#17BECF", "#F800EC", "#520000", "#276814", "#2D3BB6",
];

const TITLE: &str = "BCAssessment Neighbourhood Code Visualization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(anyhow!("Invalid hex colour: {:?}", hex));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .with_context(|| format!("Invalid hex colour: {:?}", hex))
        };
        Ok(Color {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Ordered list of colours that neighbourhood codes cycle through.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette(Vec<Color>);

impl Palette {
    pub fn from_hex<S: AsRef<str>>(codes: &[S]) -> Result<Self> {
        if codes.is_empty() {
            return Err(anyhow!("Palette must contain at least one colour"));
        }
        let colors = codes
            .iter()
            .map(|c| Color::from_hex(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Palette(colors))
    }

    pub fn colors(&self) -> &[Color] {
        &self.0
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette(
            DEFAULT_PALETTE
                .iter()
                .filter_map(|hex| Color::from_hex(hex).ok())
                .collect(),
        )
    }
}

/// Sorts the distinct codes and assigns palette colours by index, wrapping around.
pub fn color_map(codes: impl IntoIterator<Item = u32>, palette: &Palette) -> BTreeMap<u32, Color> {
    let mut codes: Vec<u32> = codes.into_iter().collect();
    codes.sort_unstable();
    codes.dedup();

    let colors = palette.colors();
    codes
        .into_iter()
        .enumerate()
        .filter_map(|(i, code)| {
            colors.get(i % colors.len().max(1)).map(|c| (code, *c))
        })
        .collect()
}

/// Raster backdrop plus the geographic extent it covers.
#[derive(Clone, Serialize)]
pub struct Basemap {
    pub source: PathBuf,
    pub extent: BoundingBox,
    #[serde(skip)]
    pub image: Arc<RgbaImage>,
}

impl std::fmt::Debug for Basemap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Basemap")
            .field("source", &self.source)
            .field("extent", &self.extent)
            .field("size", &self.image.dimensions())
            .finish()
    }
}

impl Basemap {
    pub fn load(path: &Path, extent: BoundingBox) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to load basemap image: {:?}", path))?
            .to_rgba8();
        Ok(Basemap {
            source: path.to_path_buf(),
            extent,
            image: Arc::new(image),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Style {
    pub fill_alpha: f32,
    pub outline_alpha: f32,
    pub outline_width: f32,
}

impl Default for Style {
    fn default() -> Self {
        Style {
            fill_alpha: 0.2,
            outline_alpha: 0.9,
            outline_width: 1.5,
        }
    }
}

/// Everything the renderer needs besides the computed geometry.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub palette: Palette,
    pub style: Style,
    pub width: u32,
    pub height: u32,
}

impl RenderOptions {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let palette = match &config.render.palette {
            Some(codes) => Palette::from_hex(codes)?,
            None => Palette::default(),
        };
        Ok(RenderOptions {
            palette,
            style: Style {
                fill_alpha: config.render.fill_alpha,
                outline_alpha: config.render.outline_alpha,
                outline_width: config.render.outline_width,
            },
            width: config.render.width,
            height: config.render.height,
        })
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            palette: Palette::default(),
            style: Style::default(),
            width: 2000,
            height: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawCommand {
    Basemap(Basemap),
    FilledPolygon {
        code: u32,
        ring: Vec<GeoPoint>,
        color: Color,
        alpha: f32,
    },
    Label {
        code: u32,
        position: GeoPoint,
        text: String,
        color: Color,
        background: Color,
        background_alpha: f32,
    },
    Polyline {
        code: u32,
        points: Vec<GeoPoint>,
        color: Color,
        alpha: f32,
        width: f32,
    },
}

/// Backend-neutral drawing: commands are listed back to front.
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub title: String,
    pub extent: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub colors: BTreeMap<u32, Color>,
    pub commands: Vec<DrawCommand>,
}

impl Scene {
    pub fn polygons(&self) -> impl Iterator<Item = (u32, &[GeoPoint], Color)> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::FilledPolygon { code, ring, color, .. } => Some((*code, ring.as_slice(), *color)),
            _ => None,
        })
    }
}

/// Composes basemap, hull fills, labels and hull outlines, in that order.
///
/// Colours come from the codes present in `codes` (the filtered records),
/// so they do not depend on record order.
pub fn render_scene(
    codes: impl IntoIterator<Item = u32>,
    summaries: &[BoundarySummary],
    hulls: &[BoundaryPolygon],
    basemap: &Basemap,
    extent: BoundingBox,
    options: &RenderOptions,
) -> Scene {
    let colors = color_map(codes, &options.palette);
    let color_of = |code: u32| colors.get(&code).copied().unwrap_or(Color::BLACK);
    let style = options.style;

    let mut commands = Vec::with_capacity(1 + summaries.len() + hulls.len() * 2);
    commands.push(DrawCommand::Basemap(basemap.clone()));

    for hull in hulls {
        commands.push(DrawCommand::FilledPolygon {
            code: hull.code,
            ring: hull.vertices.clone(),
            color: color_of(hull.code),
            alpha: style.fill_alpha,
        });
    }

    for summary in summaries {
        commands.push(DrawCommand::Label {
            code: summary.code,
            position: GeoPoint::new(summary.lon_mean, summary.lat_mean),
            text: summary.code.to_string(),
            color: Color::WHITE,
            background: Color::BLACK,
            background_alpha: 0.6,
        });
    }

    for hull in hulls {
        commands.push(DrawCommand::Polyline {
            code: hull.code,
            points: hull.vertices.clone(),
            color: color_of(hull.code),
            alpha: style.outline_alpha,
            width: style.outline_width,
        });
    }

    Scene {
        title: TITLE.to_string(),
        extent,
        width: options.width,
        height: options.height,
        colors,
        commands,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn blank_basemap(extent: BoundingBox) -> Basemap {
        Basemap {
            source: PathBuf::from("memory"),
            extent,
            image: Arc::new(RgbaImage::from_pixel(8, 4, image::Rgba([200, 200, 200, 255]))),
        }
    }

    fn summary(code: u32, lat: f64, lon: f64) -> BoundarySummary {
        BoundarySummary {
            code,
            lat_min: lat,
            lat_max: lat,
            lat_mean: lat,
            lon_min: lon,
            lon_max: lon,
            lon_mean: lon,
            postal_codes: 1,
            property_count: 1,
        }
    }

    fn triangle(code: u32) -> BoundaryPolygon {
        let a = GeoPoint::new(-123.2, 49.22);
        BoundaryPolygon {
            code,
            vertices: vec![a, GeoPoint::new(-123.1, 49.22), GeoPoint::new(-123.15, 49.28), a],
        }
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Color::from_hex("#D62728").unwrap(), Color { r: 0xD6, g: 0x27, b: 0x28 });
        assert_eq!(Color::from_hex("1f77b4").unwrap().to_hex(), "#1F77B4");
        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("#GG0000").is_err());
        assert_eq!(Palette::default().colors().len(), 12);
    }

    #[test]
    fn test_color_map_sorted_and_cycled() {
        let palette = Palette::from_hex(&["#000001", "#000002"]).unwrap();

        let map = color_map(vec![30, 4, 12, 4], &palette);

        assert_eq!(map.len(), 3);
        assert_eq!(map[&4].b, 1);
        assert_eq!(map[&12].b, 2);
        assert_eq!(map[&30].b, 1);
    }

    #[test]
    fn test_color_map_independent_of_order() {
        let palette = Palette::default();
        let a = color_map(vec![7, 1, 22, 3, 15], &palette);
        let b = color_map(vec![15, 22, 3, 1, 7, 7], &palette);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scene_command_order() {
        let bbox = BoundingBox::default();
        let scene = render_scene(
            vec![2, 7],
            &[summary(2, 49.25, -123.15), summary(7, 49.26, -123.1)],
            &[triangle(7)],
            &blank_basemap(bbox),
            bbox,
            &RenderOptions::default(),
        );

        let kinds: Vec<&str> = scene
            .commands
            .iter()
            .map(|c| match c {
                DrawCommand::Basemap(_) => "basemap",
                DrawCommand::FilledPolygon { .. } => "fill",
                DrawCommand::Label { .. } => "label",
                DrawCommand::Polyline { .. } => "line",
            })
            .collect();
        assert_eq!(kinds, vec!["basemap", "fill", "label", "label", "line"]);

        let (code, ring, color) = scene.polygons().next().unwrap();
        assert_eq!(code, 7);
        assert_eq!(ring.first(), ring.last());
        // 7 is the second code present, so it takes the second palette colour
        assert_eq!(color.to_hex(), "#1F77B4");
    }

    #[test]
    fn test_label_at_mean() {
        let bbox = BoundingBox::default();
        let scene = render_scene(
            vec![5],
            &[summary(5, 49.24, -123.21)],
            &[],
            &blank_basemap(bbox),
            bbox,
            &RenderOptions::default(),
        );

        let label = scene.commands.iter().find_map(|c| match c {
            DrawCommand::Label { position, text, .. } => Some((*position, text.clone())),
            _ => None,
        });
        assert_eq!(label, Some((GeoPoint::new(-123.21, 49.24), "5".to_string())));
    }

    #[test]
    fn test_scene_serializes_without_pixels() {
        let bbox = BoundingBox::default();
        let scene = render_scene(vec![7], &[], &[triangle(7)], &blank_basemap(bbox), bbox, &RenderOptions::default());

        let json = serde_json::to_value(&scene).unwrap();

        assert_eq!(json["commands"][0]["kind"], "basemap");
        assert!(json["commands"][0].get("image").is_none());
        assert_eq!(json["commands"][1]["color"], "#D62728");
        assert_eq!(json["colors"]["7"], "#D62728");
    }
}
