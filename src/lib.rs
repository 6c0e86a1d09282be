//! Neighbourhood boundary estimation for municipal property data.
//!
//! Property records are joined to postal code coordinates, filtered per
//! neighbourhood by z-score, summarised, wrapped in convex hulls and composed
//! into a backend-neutral [`render::Scene`].

pub mod config;
pub mod data;
pub mod export;
pub mod features;
pub mod hull;
pub mod names;
pub mod pipeline;
pub mod processing;
pub mod raster;
pub mod render;
pub mod server;
pub mod summary;
pub mod types;

pub use config::AppConfig;
pub use data::Dataset;
pub use pipeline::{run_pipeline, PipelineError, PipelineOutput};
pub use types::{BoundaryPolygon, BoundarySummary, BoundingBox, GeoPoint, PropertyRecord};
