use crate::processing::Groups;
use crate::types::{BoundaryPolygon, GeoPoint, NeighbourhoodGroup};
use geo::{Area, ConvexHull, Coord, LineString, MultiPoint, Point, Winding};
use std::cmp::Ordering;
use tracing::debug;

/// Hulls enclosing less area than this (square degrees) are treated as collinear.
const MIN_HULL_AREA: f64 = 1e-14;

/// Convex hull per group, in ascending code order. Groups with fewer than
/// three distinct points, or whose points are collinear, are skipped.
pub fn build_hulls(groups: &Groups) -> Vec<BoundaryPolygon> {
    groups.values().filter_map(build_hull).collect()
}

pub fn build_hull(group: &NeighbourhoodGroup) -> Option<BoundaryPolygon> {
    let points = distinct_points(group.points());
    if points.len() < 3 {
        debug!("Neighbourhood {}: {} distinct points, no hull", group.code, points.len());
        return None;
    }

    let multi_point: MultiPoint<f64> = points
        .iter()
        .map(|p| Point::new(p.lon, p.lat))
        .collect::<Vec<_>>()
        .into();
    let hull = multi_point.convex_hull();

    if hull.unsigned_area() <= MIN_HULL_AREA {
        debug!("Neighbourhood {}: points are collinear, no hull", group.code);
        return None;
    }

    let vertices = normalized_ring(hull.exterior().clone());
    if vertices.len() < 4 {
        return None;
    }

    Some(BoundaryPolygon {
        code: group.code,
        vertices,
    })
}

fn compare_points(a: &GeoPoint, b: &GeoPoint) -> Ordering {
    a.lon.total_cmp(&b.lon).then(a.lat.total_cmp(&b.lat))
}

fn distinct_points(mut points: Vec<GeoPoint>) -> Vec<GeoPoint> {
    points.retain(|p| p.lon.is_finite() && p.lat.is_finite());
    points.sort_by(compare_points);
    points.dedup();
    points
}

/// Counter-clockwise, starting from the smallest (lon, lat) vertex, closed.
fn normalized_ring(mut ring: LineString<f64>) -> Vec<GeoPoint> {
    ring.make_ccw_winding();

    let mut vertices: Vec<GeoPoint> = ring
        .coords()
        .map(|c: &Coord<f64>| GeoPoint::new(c.x, c.y))
        .collect();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices.dedup();

    let start = vertices
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| compare_points(a, b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    vertices.rotate_left(start);

    if let Some(&first) = vertices.first() {
        vertices.push(first);
    }
    vertices
}
