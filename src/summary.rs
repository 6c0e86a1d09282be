use crate::processing::{mean, Groups};
use crate::types::{BoundarySummary, NeighbourhoodGroup};
use std::collections::BTreeSet;

/// Per-group extents, means and counts, in ascending code order.
/// Empty groups produce no summary.
pub fn summarize(groups: &Groups) -> Vec<BoundarySummary> {
    groups.values().filter_map(summarize_group).collect()
}

pub fn summarize_group(group: &NeighbourhoodGroup) -> Option<BoundarySummary> {
    let points = group.points();
    if points.is_empty() {
        return None;
    }

    let mut summary = BoundarySummary {
        code: group.code,
        lat_min: f64::INFINITY,
        lat_max: f64::NEG_INFINITY,
        lat_mean: 0.0,
        lon_min: f64::INFINITY,
        lon_max: f64::NEG_INFINITY,
        lon_mean: 0.0,
        postal_codes: 0,
        property_count: points.len(),
    };

    for p in &points {
        summary.lat_min = summary.lat_min.min(p.lat);
        summary.lat_max = summary.lat_max.max(p.lat);
        summary.lon_min = summary.lon_min.min(p.lon);
        summary.lon_max = summary.lon_max.max(p.lon);
    }
    summary.lat_mean = mean(&points.iter().map(|p| p.lat).collect::<Vec<_>>());
    summary.lon_mean = mean(&points.iter().map(|p| p.lon).collect::<Vec<_>>());

    summary.postal_codes = group
        .records
        .iter()
        .filter(|r| r.location.is_some())
        .map(|r| r.postal_code.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    Some(summary)
}
