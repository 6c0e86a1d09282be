use serde::{Deserialize, Serialize};

/// A longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Rectangular lon/lat region used to discard geocoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    /// Strict containment: points on the edge are outside.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lon > self.lon_min
            && point.lon < self.lon_max
            && point.lat > self.lat_min
            && point.lat < self.lat_max
    }

    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }
}

impl Default for BoundingBox {
    // Greater Vancouver
    fn default() -> Self {
        Self {
            lon_min: -123.3,
            lon_max: -123.0,
            lat_min: 49.2,
            lat_max: 49.3,
        }
    }
}

/// One row of the property tax report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyRecord {
    pub pid: String,
    pub neighbourhood_code: u32,
    pub postal_code: String,
    pub land_value: Option<f64>,
    pub improvement_value: Option<f64>,
    pub improvement_year: Option<f64>,
    pub report_year: Option<f64>,
    pub zoning_classification: Option<String>,
    pub legal_type: Option<String>,
    // None until geocoded
    pub location: Option<GeoPoint>,
}

/// Postal code to coordinate lookup entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PostalGeocode {
    pub postal_code: String,
    pub location: GeoPoint,
}

/// The records assigned to one neighbourhood code.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighbourhoodGroup {
    pub code: u32,
    pub records: Vec<PropertyRecord>,
}

impl NeighbourhoodGroup {
    pub fn new(code: u32) -> Self {
        Self {
            code,
            records: Vec::new(),
        }
    }

    /// Coordinates of every geocoded member, in record order.
    pub fn points(&self) -> Vec<GeoPoint> {
        self.records.iter().filter_map(|r| r.location).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Closed convex ring around a group's filtered points.
///
/// Vertices run counter-clockwise starting at the smallest (lon, lat) vertex,
/// and the last vertex repeats the first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryPolygon {
    pub code: u32,
    pub vertices: Vec<GeoPoint>,
}

impl BoundaryPolygon {
    pub fn is_closed(&self) -> bool {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) => self.vertices.len() >= 4 && first == last,
            _ => false,
        }
    }

    /// Vertices without the closing duplicate.
    pub fn distinct_vertices(&self) -> &[GeoPoint] {
        match self.vertices.split_last() {
            Some((_, rest)) if self.is_closed() => rest,
            _ => &self.vertices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundarySummary {
    pub code: u32,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lat_mean: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lon_mean: f64,
    pub postal_codes: usize,
    pub property_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_is_strict() {
        let bbox = BoundingBox::default();
        assert!(bbox.contains(&GeoPoint::new(-123.1, 49.25)));
        assert!(!bbox.contains(&GeoPoint::new(-123.3, 49.25)));
        assert!(!bbox.contains(&GeoPoint::new(-123.1, 49.3)));
        assert!(!bbox.contains(&GeoPoint::new(-122.9, 49.25)));
    }

    #[test]
    fn polygon_closure() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let c = GeoPoint::new(0.0, 1.0);
        let ring = BoundaryPolygon {
            code: 1,
            vertices: vec![a, b, c, a],
        };
        assert!(ring.is_closed());
        assert_eq!(ring.distinct_vertices(), &[a, b, c]);

        let open = BoundaryPolygon {
            code: 1,
            vertices: vec![a, b, c],
        };
        assert!(!open.is_closed());
    }
}
