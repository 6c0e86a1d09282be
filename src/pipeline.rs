use crate::data::Dataset;
use crate::hull::build_hulls;
use crate::processing::{filter_outliers, partition, Groups};
use crate::raster::{self, RasterError};
use crate::render::{render_scene, Basemap, RenderOptions, Scene};
use crate::summary::summarize;
use crate::types::{BoundaryPolygon, BoundarySummary};
use thiserror::Error;
use tracing::info;

/// Errors from one pipeline run. `InvalidThreshold` is bad caller input;
/// the rest indicate a bug rather than dirty data.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("max_z_score must be a positive finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("Boundary for neighbourhood {code} is not a closed ring")]
    OpenRing { code: u32 },

    #[error("Rasterization failed: {0}")]
    Raster(#[from] RasterError),
}

impl PipelineError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, PipelineError::InvalidThreshold(_))
    }
}

/// Result of one Filter -> Aggregate -> Hull -> Render pass.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub filtered: Groups,
    pub summaries: Vec<BoundarySummary>,
    pub hulls: Vec<BoundaryPolygon>,
    pub scene: Scene,
}

impl PipelineOutput {
    pub fn retained_count(&self) -> usize {
        self.filtered.values().map(|g| g.len()).sum()
    }

    pub fn render_png(&self) -> Result<Vec<u8>, PipelineError> {
        let image = raster::rasterize(&self.scene)?;
        Ok(raster::encode_png(&image)?)
    }
}

pub fn validate_threshold(max_z_score: f64) -> Result<f64, PipelineError> {
    if max_z_score.is_finite() && max_z_score > 0.0 {
        Ok(max_z_score)
    } else {
        Err(PipelineError::InvalidThreshold(max_z_score))
    }
}

/// Filters, aggregates and computes boundaries without rendering.
pub fn compute_boundaries(
    dataset: &Dataset,
    max_z_score: f64,
) -> Result<(Groups, Vec<BoundarySummary>, Vec<BoundaryPolygon>), PipelineError> {
    let max_z_score = validate_threshold(max_z_score)?;

    let groups = partition(&dataset.records);
    let filtered = filter_outliers(&groups, max_z_score);
    let summaries = summarize(&filtered);
    let hulls = build_hulls(&filtered);

    if let Some(open) = hulls.iter().find(|h| !h.is_closed()) {
        return Err(PipelineError::OpenRing { code: open.code });
    }

    info!(
        "max_z_score {}: {} groups, {} boundaries",
        max_z_score,
        filtered.len(),
        hulls.len()
    );
    Ok((filtered, summaries, hulls))
}

/// Runs the full chain from scratch for one threshold.
pub fn run_pipeline(
    dataset: &Dataset,
    max_z_score: f64,
    basemap: &Basemap,
    options: &RenderOptions,
) -> Result<PipelineOutput, PipelineError> {
    let (filtered, summaries, hulls) = compute_boundaries(dataset, max_z_score)?;
    let scene = render_scene(
        filtered.keys().copied(),
        &summaries,
        &hulls,
        basemap,
        dataset.bounds,
        options,
    );

    Ok(PipelineOutput {
        filtered,
        summaries,
        hulls,
        scene,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::record;
    use crate::render::tests::blank_basemap;
    use crate::types::{BoundingBox, GeoPoint, PropertyRecord};

    fn dataset() -> Dataset {
        let mut records = Vec::new();
        let mut push = |code: u32, lat: f64, lon: f64| {
            let mut r: PropertyRecord = record(&records.len().to_string(), code, "V6H 1A1");
            r.location = Some(GeoPoint::new(lon, lat));
            records.push(r);
        };
        for i in 0..12 {
            let f = i as f64;
            push(3, 49.22 + (f * 0.0037) % 0.03, -123.20 + (f * 0.0053) % 0.04);
            push(11, 49.26 + (f * 0.0041) % 0.02, -123.08 + (f * 0.0029) % 0.03);
        }
        push(20, 49.25, -123.05);
        push(20, 49.26, -123.05);
        Dataset {
            records,
            bounds: BoundingBox::default(),
        }
    }

    #[test]
    fn test_invalid_threshold() {
        let ds = dataset();
        let basemap = blank_basemap(ds.bounds);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = run_pipeline(&ds, bad, &basemap, &RenderOptions::default()).unwrap_err();
            assert!(err.is_invalid_input());
        }
    }

    #[test]
    fn test_deterministic() {
        let ds = dataset();
        let basemap = blank_basemap(ds.bounds);
        let a = run_pipeline(&ds, 1.25, &basemap, &RenderOptions::default()).unwrap();
        let b = run_pipeline(&ds, 1.25, &basemap, &RenderOptions::default()).unwrap();

        assert_eq!(a.filtered, b.filtered);
        assert_eq!(a.summaries, b.summaries);
        assert_eq!(a.hulls, b.hulls);
        assert_eq!(a.scene.colors, b.scene.colors);
    }

    #[test]
    fn test_two_point_group_has_summary_but_no_hull() {
        let ds = dataset();
        let out = run_pipeline(&ds, 1.25, &blank_basemap(ds.bounds), &RenderOptions::default()).unwrap();

        assert!(out.summaries.iter().any(|s| s.code == 20));
        assert!(out.hulls.iter().all(|h| h.code != 20));
        assert!(out.hulls.iter().any(|h| h.code == 3));
        assert!(out.hulls.iter().any(|h| h.code == 11));
    }

    #[test]
    fn test_hull_vertices_subset_of_filtered() {
        let ds = dataset();
        let out = run_pipeline(&ds, 1.0, &blank_basemap(ds.bounds), &RenderOptions::default()).unwrap();

        for hull in &out.hulls {
            assert!(hull.is_closed());
            let points = out.filtered[&hull.code].points();
            assert!(hull.vertices.iter().all(|v| points.contains(v)));
        }
    }

    #[test]
    fn test_record_order_does_not_change_colors() {
        let ds = dataset();
        let mut reversed = ds.clone();
        reversed.records.reverse();
        let basemap = blank_basemap(ds.bounds);

        let a = run_pipeline(&ds, 1.25, &basemap, &RenderOptions::default()).unwrap();
        let b = run_pipeline(&reversed, 1.25, &basemap, &RenderOptions::default()).unwrap();

        assert_eq!(a.scene.colors, b.scene.colors);
        assert_eq!(a.hulls, b.hulls);
    }

    #[test]
    fn test_render_png() {
        let ds = dataset();
        let options = RenderOptions {
            width: 120,
            height: 40,
            ..RenderOptions::default()
        };
        let out = run_pipeline(&ds, 1.25, &blank_basemap(ds.bounds), &options).unwrap();

        let png = out.render_png().unwrap();
        assert!(png.starts_with(b"\x89PNG"));
    }
}
