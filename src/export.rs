use crate::names::display_name;
use crate::render::Scene;
use crate::types::BoundarySummary;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;

/// One Polygon feature per boundary in the scene, with its colour and summary.
pub fn boundaries_geojson(scene: &Scene, summaries: &[BoundarySummary]) -> FeatureCollection {
    let features = scene
        .polygons()
        .map(|(code, ring, color)| {
            let exterior: Vec<Vec<f64>> = ring.iter().map(|p| vec![p.lon, p.lat]).collect();

            let mut properties = JsonObject::new();
            properties.insert("code".to_string(), json!(code));
            properties.insert("name".to_string(), json!(display_name(code)));
            properties.insert("color".to_string(), json!(color.to_hex()));
            if let Some(s) = summaries.iter().find(|s| s.code == code) {
                properties.insert("property_count".to_string(), json!(s.property_count));
                properties.insert("postal_codes".to_string(), json!(s.postal_codes));
                properties.insert("center".to_string(), json!([s.lon_mean, s.lat_mean]));
            }

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Polygon(vec![exterior]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
