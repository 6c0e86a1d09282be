use crate::types::BoundingBox;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_Z_SCORE: f64 = 1.25;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub bounds: BoundingBox,
    #[serde(default)]
    pub filter: FilterConfig,
    pub render: RenderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub property_csv: PathBuf,
    #[serde(default = "default_property_delimiter")]
    pub property_delimiter: char,
    pub geocode_table: PathBuf,
    #[serde(default = "default_postal_prefix")]
    pub postal_prefix: String, // Province postal prefix, "V" for BC
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    pub max_z_score: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_z_score: DEFAULT_MAX_Z_SCORE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    pub basemap: PathBuf,
    pub basemap_extent: Option<BoundingBox>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fill_alpha")]
    pub fill_alpha: f32,
    #[serde(default = "default_outline_alpha")]
    pub outline_alpha: f32,
    #[serde(default = "default_outline_width")]
    pub outline_width: f32,
    pub palette: Option<Vec<String>>, // Hex codes
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub png: PathBuf,
    #[serde(default = "default_features_csv")]
    pub features: PathBuf, // Encoded training matrix
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            png: PathBuf::from("neighbourhoods.png"),
            features: default_features_csv(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: PathBuf::from("."),
        }
    }
}

fn default_features_csv() -> PathBuf {
    PathBuf::from("training_features.csv")
}

fn default_property_delimiter() -> char {
    ';'
}

fn default_postal_prefix() -> String {
    "V".to_string()
}

fn default_width() -> u32 {
    2000
}

fn default_height() -> u32 {
    1000
}

fn default_fill_alpha() -> f32 {
    0.2
}

fn default_outline_alpha() -> f32 {
    0.9
}

fn default_outline_width() -> f32 {
    1.5
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.input.property_delimiter.is_ascii() {
            return Err(anyhow!("property_delimiter must be a single ASCII character"));
        }
        let b = &self.bounds;
        if !(b.lon_min < b.lon_max && b.lat_min < b.lat_max) {
            return Err(anyhow!("Bounding box is empty: {:?}", b));
        }
        if !(self.filter.max_z_score.is_finite() && self.filter.max_z_score > 0.0) {
            return Err(anyhow!("filter.max_z_score must be positive, got {}", self.filter.max_z_score));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(anyhow!("Render size must be non-zero"));
        }
        Ok(())
    }

    /// Geographic extent the basemap image covers; the bounding box unless overridden.
    pub fn basemap_extent(&self) -> BoundingBox {
        self.render.basemap_extent.unwrap_or(self.bounds)
    }
}
