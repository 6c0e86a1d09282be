use crate::config::AppConfig;
use crate::types::{BoundingBox, GeoPoint, PostalGeocode, PropertyRecord};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use tracing::{debug, info};

/// Immutable snapshot of the geocoded dataset, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<PropertyRecord>,
    pub bounds: BoundingBox,
}

/// Postal code -> coordinate lookup.
#[derive(Debug, Clone, Default)]
pub struct GeocodeTable {
    entries: HashMap<String, GeoPoint>,
}

impl GeocodeTable {
    /// Later entries for the same postal code replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = PostalGeocode>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| (e.postal_code, e.location))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, postal_code: &str) -> Option<GeoPoint> {
        self.entries.get(postal_code.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Raw row of the property tax report. Unparseable numbers become None.
#[derive(Debug, Deserialize)]
struct PropertyRow {
    #[serde(rename = "PID")]
    pid: String,
    #[serde(rename = "NEIGHBOURHOOD_CODE", deserialize_with = "csv::invalid_option")]
    neighbourhood_code: Option<u32>,
    #[serde(rename = "PROPERTY_POSTAL_CODE")]
    postal_code: Option<String>,
    #[serde(rename = "LAND_COORDINATE")]
    land_coordinate: Option<String>,
    #[serde(rename = "CURRENT_LAND_VALUE", default, deserialize_with = "csv::invalid_option")]
    land_value: Option<f64>,
    #[serde(rename = "CURRENT_IMPROVEMENT_VALUE", default, deserialize_with = "csv::invalid_option")]
    improvement_value: Option<f64>,
    #[serde(rename = "BIG_IMPROVEMENT_YEAR", default, deserialize_with = "csv::invalid_option")]
    improvement_year: Option<f64>,
    #[serde(rename = "REPORT_YEAR", default, deserialize_with = "csv::invalid_option")]
    report_year: Option<f64>,
    #[serde(rename = "ZONING_CLASSIFICATION", default)]
    zoning_classification: Option<String>,
    #[serde(rename = "LEGAL_TYPE", default)]
    legal_type: Option<String>,
}

impl PropertyRow {
    fn into_record(self) -> Option<PropertyRecord> {
        let code = self.neighbourhood_code?;
        let postal_code = non_empty(self.postal_code)?;
        // Rows without a land coordinate are unusable
        non_empty(self.land_coordinate)?;

        Some(PropertyRecord {
            pid: self.pid,
            neighbourhood_code: code,
            postal_code,
            land_value: self.land_value,
            improvement_value: self.improvement_value,
            improvement_year: self.improvement_year,
            report_year: self.report_year,
            zoning_classification: non_empty(self.zoning_classification),
            legal_type: non_empty(self.legal_type),
            location: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Loads both source tables and joins them. Any I/O or parse failure is fatal.
pub fn load_dataset(config: &AppConfig) -> Result<Dataset> {
    info!("Loading property records from {:?}", config.input.property_csv);
    let file = File::open(&config.input.property_csv)
        .with_context(|| format!("Failed to open property CSV: {:?}", config.input.property_csv))?;
    let records = read_property_records(file, config.input.property_delimiter as u8)?;
    info!("Loaded {} property records", records.len());

    info!("Loading geocode table from {:?}", config.input.geocode_table);
    let file = File::open(&config.input.geocode_table)
        .with_context(|| format!("Failed to open geocode table: {:?}", config.input.geocode_table))?;
    let table = read_geocode_table(file, &config.input.postal_prefix)?;
    info!("Loaded {} postal codes with prefix {:?}", table.len(), config.input.postal_prefix);

    let records = geo_join(records, &table, &config.bounds);
    info!("{} records geocoded inside bounds", records.len());

    Ok(Dataset {
        records,
        bounds: config.bounds,
    })
}

pub fn read_property_records<R: Read>(reader: R, delimiter: u8) -> Result<Vec<PropertyRecord>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    for required in ["PID", "NEIGHBOURHOOD_CODE", "PROPERTY_POSTAL_CODE", "LAND_COORDINATE"] {
        if !headers.iter().any(|h| h == required) {
            return Err(anyhow!("Column '{}' not found in property CSV", required));
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for result in rdr.deserialize::<PropertyRow>() {
        let row = result.context("Malformed property CSV row")?;
        match row.into_record() {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    debug!("Skipped {} property rows missing code, postal code or land coordinate", skipped);

    Ok(records)
}

/// Reads a headerless tab-delimited postal code table, keeping codes starting with `prefix`.
pub fn read_geocode_table<R: Read>(reader: R, prefix: &str) -> Result<GeocodeTable> {
    // country, postal_code, place_name, province, province_code, c6..c9, latitude, longitude, accuracy
    const POSTAL_COL: usize = 1;
    const LAT_COL: usize = 9;
    const LON_COL: usize = 10;

    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut entries = Vec::new();
    for result in rdr.records() {
        let record = result.context("Malformed geocode table row")?;
        let postal_code = record.get(POSTAL_COL).unwrap_or("").trim();
        if postal_code.is_empty() || !postal_code.starts_with(prefix) {
            continue;
        }
        let lat = record.get(LAT_COL).and_then(|v| v.trim().parse::<f64>().ok());
        let lon = record.get(LON_COL).and_then(|v| v.trim().parse::<f64>().ok());
        if let (Some(lat), Some(lon)) = (lat, lon) {
            entries.push(PostalGeocode {
                postal_code: postal_code.to_string(),
                location: GeoPoint::new(lon, lat),
            });
        }
    }

    Ok(GeocodeTable::from_entries(entries))
}

/// Attaches coordinates by postal code, dropping unmatched records and
/// records outside `bbox`.
pub fn geo_join(
    records: Vec<PropertyRecord>,
    table: &GeocodeTable,
    bbox: &BoundingBox,
) -> Vec<PropertyRecord> {
    let total = records.len();
    let joined: Vec<PropertyRecord> = records
        .into_iter()
        .filter_map(|mut record| {
            let location = table.lookup(&record.postal_code)?;
            if !location.lon.is_finite() || !location.lat.is_finite() || !bbox.contains(&location) {
                return None;
            }
            record.location = Some(location);
            Some(record)
        })
        .collect();

    debug!("Excluded {} of {} records during geocoding", total - joined.len(), total);
    joined
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(pid: &str, code: u32, postal: &str) -> PropertyRecord {
        PropertyRecord {
            pid: pid.to_string(),
            neighbourhood_code: code,
            postal_code: postal.to_string(),
            land_value: Some(1_000_000.0),
            improvement_value: Some(250_000.0),
            improvement_year: Some(1990.0),
            report_year: Some(2024.0),
            zoning_classification: Some("One-Family Dwelling".to_string()),
            legal_type: Some("LAND".to_string()),
            location: None,
        }
    }

    fn table() -> GeocodeTable {
        GeocodeTable::from_entries(vec![
            PostalGeocode {
                postal_code: "V6K 1A1".to_string(),
                location: GeoPoint::new(-123.16, 49.27),
            },
            PostalGeocode {
                postal_code: "V5N 2B2".to_string(),
                location: GeoPoint::new(-123.07, 49.26),
            },
            PostalGeocode {
                postal_code: "V9Z 9Z9".to_string(),
                location: GeoPoint::new(-124.5, 48.9),
            },
        ])
    }

    #[test]
    fn test_geo_join_attaches_and_filters() {
        let records = vec![
            record("1", 2, "V6K 1A1"),
            record("2", 14, "V5N 2B2"),
            record("3", 14, "V0X 0X0"), // no match
            record("4", 5, "V9Z 9Z9"),  // outside bounds
        ];

        let joined = geo_join(records, &table(), &BoundingBox::default());

        let pids: Vec<&str> = joined.iter().map(|r| r.pid.as_str()).collect();
        assert_eq!(pids, vec!["1", "2"]);
        assert_eq!(joined[0].location, Some(GeoPoint::new(-123.16, 49.27)));
        let bbox = BoundingBox::default();
        assert!(joined.iter().all(|r| r.location.map_or(false, |p| bbox.contains(&p))));
    }

    #[test]
    fn test_geo_join_is_deterministic() {
        let make = || vec![record("1", 2, "V6K 1A1"), record("2", 14, "V5N 2B2")];
        let a = geo_join(make(), &table(), &BoundingBox::default());
        let b = geo_join(make(), &table(), &BoundingBox::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_read_property_records_coerces_and_drops() {
        let csv = "PID;NEIGHBOURHOOD_CODE;PROPERTY_POSTAL_CODE;LAND_COORDINATE;CURRENT_LAND_VALUE;CURRENT_IMPROVEMENT_VALUE\n\
                   001-111;013;V5N 2B2;123;1500000;n/a\n\
                   001-112;;V5N 2B2;124;1500000;200000\n\
                   001-113;7;;125;1500000;200000\n\
                   001-114;7;V6K 1A1;;1500000;200000\n";

        let records = read_property_records(csv.as_bytes(), b';').unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].neighbourhood_code, 13);
        assert_eq!(records[0].land_value, Some(1_500_000.0));
        assert_eq!(records[0].improvement_value, None);
        assert!(records[0].location.is_none());
    }

    #[test]
    fn test_read_property_records_requires_columns() {
        let csv = "PID;PROPERTY_POSTAL_CODE\n1;V5N 2B2\n";
        assert!(read_property_records(csv.as_bytes(), b';').is_err());
    }

    #[test]
    fn test_read_geocode_table_prefix_and_last_wins() {
        let tsv = "CA\tV6K 1A1\tVancouver\tBritish Columbia\tBC\t\t\t\t\t49.27\t-123.16\t6\n\
                   CA\tT2P 0A1\tCalgary\tAlberta\tAB\t\t\t\t\t51.04\t-114.07\t6\n\
                   CA\tV6K 1A1\tVancouver\tBritish Columbia\tBC\t\t\t\t\t49.28\t-123.17\t6\n\
                   CA\tV5N 2B2\tVancouver\tBritish Columbia\tBC\t\t\t\t\tbad\t-123.07\t6\n";

        let table = read_geocode_table(tsv.as_bytes(), "V").unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("V6K 1A1"), Some(GeoPoint::new(-123.17, 49.28)));
        assert_eq!(table.lookup("T2P 0A1"), None);
    }
}
