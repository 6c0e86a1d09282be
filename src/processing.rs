use crate::types::{NeighbourhoodGroup, PropertyRecord};
use std::collections::BTreeMap;
use tracing::debug;

/// Standard deviations at or below this (in degrees) count as zero.
const DEGENERATE_STD: f64 = 1e-12;

/// Groups keyed by neighbourhood code, iterated in ascending code order.
pub type Groups = BTreeMap<u32, NeighbourhoodGroup>;

/// Population mean and standard deviation of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStats {
    pub mean: f64,
    pub std: f64,
}

impl AxisStats {
    /// Divides by n, not n - 1. Returns None for an empty slice.
    pub fn population(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = mean(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - mean).powi(2)).collect();
        let variance = ordered_sum(&deviations) / n;
        Some(Self {
            mean,
            std: variance.sqrt(),
        })
    }

    /// Z-score of `value`; zero on a degenerate axis.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.std <= DEGENERATE_STD {
            0.0
        } else {
            (value - self.mean) / self.std
        }
    }
}

/// Sum taken in ascending order, so the result does not depend on input order.
pub fn ordered_sum(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.iter().sum()
}

pub fn mean(values: &[f64]) -> f64 {
    ordered_sum(values) / values.len() as f64
}

/// Splits geocoded records into disjoint groups by neighbourhood code.
/// Records without a location are left out.
pub fn partition(records: &[PropertyRecord]) -> Groups {
    let mut groups = Groups::new();
    for record in records.iter().filter(|r| r.location.is_some()) {
        groups
            .entry(record.neighbourhood_code)
            .or_insert_with(|| NeighbourhoodGroup::new(record.neighbourhood_code))
            .records
            .push(record.clone());
    }
    groups
}

/// Drops members whose latitude or longitude lies more than `max_z_score`
/// standard deviations from their group's mean. Groups left empty are removed.
pub fn filter_outliers(groups: &Groups, max_z_score: f64) -> Groups {
    groups
        .iter()
        .filter_map(|(&code, group)| {
            let filtered = filter_group(group, max_z_score);
            debug!(
                "Neighbourhood {}: kept {} of {} records",
                code,
                filtered.len(),
                group.len()
            );
            (!filtered.is_empty()).then_some((code, filtered))
        })
        .collect()
}

fn filter_group(group: &NeighbourhoodGroup, max_z_score: f64) -> NeighbourhoodGroup {
    let points = group.points();
    let lats: Vec<f64> = points.iter().map(|p| p.lat).collect();
    let lons: Vec<f64> = points.iter().map(|p| p.lon).collect();

    let (lat_stats, lon_stats) = match (AxisStats::population(&lats), AxisStats::population(&lons)) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return NeighbourhoodGroup::new(group.code),
    };

    let records = group
        .records
        .iter()
        .filter(|record| {
            record.location.map_or(false, |p| {
                lat_stats.z_score(p.lat).abs() <= max_z_score
                    && lon_stats.z_score(p.lon).abs() <= max_z_score
            })
        })
        .cloned()
        .collect();

    NeighbourhoodGroup {
        code: group.code,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::record;
    use crate::types::GeoPoint;

    fn located(pid: &str, code: u32, lat: f64, lon: f64) -> PropertyRecord {
        let mut r = record(pid, code, "V5N 2B2");
        r.location = Some(GeoPoint::new(lon, lat));
        r
    }

    #[test]
    fn test_population_stats() {
        let stats = AxisStats::population(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((stats.mean - 5.0).abs() < 1e-12);
        // Population std is exactly 2 for this set; the sample std would be ~2.14
        assert!((stats.std - 2.0).abs() < 1e-12);
        assert!(AxisStats::population(&[]).is_none());
    }

    #[test]
    fn test_stats_bit_identical_across_orders() {
        let values: Vec<f64> = (0..57).map(|i| 49.2 + ((i * 7919) % 101) as f64 * 0.000_937_1).collect();
        let mut reversed = values.clone();
        reversed.reverse();
        let mut rotated = values.clone();
        rotated.rotate_left(23);

        let a = AxisStats::population(&values).unwrap();
        assert_eq!(a, AxisStats::population(&reversed).unwrap());
        assert_eq!(a, AxisStats::population(&rotated).unwrap());
    }

    #[test]
    fn test_zero_variance_axis_scores_zero() {
        let stats = AxisStats::population(&[49.25, 49.25, 49.25]).unwrap();
        assert_eq!(stats.z_score(49.25), 0.0);
        assert!(stats.z_score(49.25).is_finite());
    }

    #[test]
    fn test_partition_is_disjoint_and_exhaustive() {
        let mut unlocated = record("x", 3, "V5N 2B2");
        unlocated.location = None;
        let records = vec![
            located("a", 7, 49.25, -123.10),
            located("b", 2, 49.26, -123.15),
            located("c", 7, 49.27, -123.11),
            unlocated,
        ];

        let groups = partition(&records);

        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![2, 7]);
        assert_eq!(groups[&7].len(), 2);
        assert_eq!(groups[&2].len(), 1);
        assert_eq!(groups.values().map(|g| g.len()).sum::<usize>(), 3);
    }

    #[test]
    fn test_filter_removes_outlier() {
        let mut records: Vec<PropertyRecord> = (0..9)
            .map(|i| located(&i.to_string(), 4, 49.25 + i as f64 * 0.001, -123.15))
            .collect();
        records.push(located("far", 4, 49.29, -123.15));

        let filtered = filter_outliers(&partition(&records), 1.25);

        let group = &filtered[&4];
        assert!(group.records.iter().all(|r| r.pid != "far"));
        assert!(group.len() < records.len());
    }

    #[test]
    fn test_identical_points_all_retained() {
        let records: Vec<PropertyRecord> = (0..5)
            .map(|i| located(&i.to_string(), 9, 49.2512, -123.1034))
            .collect();

        let filtered = filter_outliers(&partition(&records), 0.1);

        assert_eq!(filtered[&9].len(), 5);
    }

    #[test]
    fn test_monotonic_in_threshold() {
        let records: Vec<PropertyRecord> = (0..40)
            .map(|i| {
                let f = i as f64;
                located(&i.to_string(), 1 + i % 3, 49.21 + (f * 7.3) % 0.08, -123.25 + (f * 3.1) % 0.2)
            })
            .collect();
        let groups = partition(&records);

        let mut previous: Option<Groups> = None;
        for threshold in [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0] {
            let current = filter_outliers(&groups, threshold);
            if let Some(prev) = &previous {
                for (code, group) in prev {
                    let now = current.get(code).map_or(0, |g| g.len());
                    assert!(now >= group.len());
                    for r in &group.records {
                        assert!(current[code].records.contains(r));
                    }
                }
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_groups_filtered_independently() {
        let records = vec![
            located("a", 1, 49.21, -123.20),
            located("b", 1, 49.21, -123.20),
            located("c", 2, 49.28, -123.05),
        ];

        let filtered = filter_outliers(&partition(&records), 1.0);

        assert_eq!(filtered[&1].len(), 2);
        assert_eq!(filtered[&2].len(), 1);
    }
}
