//! Turns decoded shapefile records into validated [`Feature`]s.

pub mod geometry;
pub mod properties;

use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{Error, GeometryDefect, InvalidGeometryError, Result};
use crate::geofile::feature::{DecodedRecord, Feature};

pub use geometry::{canonicalize_geometry, validate_geometry};
pub use properties::normalize_properties;

/// What to do with a record whose geometry is structurally invalid.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InvalidGeometryPolicy {
    /// Fail the whole batch.
    #[default]
    Abort,
    /// Drop the record and keep going.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: GeometryDefect,
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub features: Vec<Feature>,
    pub skipped: Vec<SkippedRecord>,
}

pub fn normalize_record(record: DecodedRecord) -> Result<Feature> {
    let index = record.index;
    let geometry = record
        .geometry
        .and_then(canonicalize_geometry)
        .map_err(|reason| InvalidGeometryError { index, reason })?;
    let properties = normalize_properties(index, record.attributes)?;
    Ok(Feature {
        geometry,
        properties,
    })
}

/// Normalize a whole batch. Records are processed in parallel, results keep
/// the input order. Invalid geometries are handled according to `policy`,
/// unsupported property values always fail the batch.
pub fn normalize_records(
    records: Vec<DecodedRecord>,
    policy: InvalidGeometryPolicy,
) -> Result<NormalizedBatch> {
    let results: Vec<Result<Feature>> = records.into_par_iter().map(normalize_record).collect();

    let mut batch = NormalizedBatch::default();
    for result in results {
        match result {
            Ok(feature) => batch.features.push(feature),
            Err(Error::InvalidGeometry(error)) => match policy {
                InvalidGeometryPolicy::Abort => return Err(error.into()),
                InvalidGeometryPolicy::Skip => {
                    log::warn!("Skipping {}", error);
                    batch.skipped.push(SkippedRecord {
                        index: error.index,
                        reason: error.reason,
                    });
                }
            },
            Err(error) => return Err(error),
        }
    }
    log::info!(
        "Normalized {} features, skipped {}",
        batch.features.len(),
        batch.skipped.len()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{normalize_record, normalize_records, InvalidGeometryPolicy};
    use crate::error::{Error, GeometryDefect};
    use crate::geofile::feature::{AttributeValue, DecodedRecord};

    fn point_record(index: usize, x: f64, y: f64) -> DecodedRecord {
        DecodedRecord::new(index, geo::Geometry::Point(geo::Point::new(x, y)))
            .with_attribute("name", AttributeValue::Text(format!("point {}", index)))
    }

    fn records_with_one_invalid() -> Vec<DecodedRecord> {
        vec![
            point_record(0, 0.0, 0.0),
            point_record(1, 1.0, 1.0),
            point_record(2, f64::NAN, 2.0),
            point_record(3, 3.0, 3.0),
        ]
    }

    #[test]
    fn test_normalize_record_keeps_properties() {
        let feature = normalize_record(point_record(5, 10.0, 20.0)).unwrap();
        assert_eq!(feature.geometry, geo::Geometry::Point(geo::Point::new(10.0, 20.0)));
        assert_eq!(feature.properties["name"], "point 5");
    }

    #[test]
    fn test_skip_policy_drops_invalid_records_in_order() {
        let batch = normalize_records(records_with_one_invalid(), InvalidGeometryPolicy::Skip)
            .unwrap();
        let names: Vec<&str> = batch
            .features
            .iter()
            .map(|feature| feature.properties["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["point 0", "point 1", "point 3"]);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].index, 2);
    }

    #[test]
    fn test_abort_policy_reports_first_invalid_record() {
        let mut records = records_with_one_invalid();
        records.push(DecodedRecord::defective(4, GeometryDefect::Missing));
        match normalize_records(records, InvalidGeometryPolicy::Abort) {
            Err(Error::InvalidGeometry(error)) => assert_eq!(error.index, 2),
            other => panic!("Expected an invalid geometry error, got {:?}", other),
        }
    }

    #[rstest]
    #[case(InvalidGeometryPolicy::Abort)]
    #[case(InvalidGeometryPolicy::Skip)]
    fn test_unsupported_property_fails_regardless_of_policy(#[case] policy: InvalidGeometryPolicy) {
        let records = vec![
            point_record(0, 0.0, 0.0),
            point_record(1, 1.0, 1.0).with_attribute("height", AttributeValue::Real(f64::NAN)),
        ];
        match normalize_records(records, policy) {
            Err(Error::UnsupportedPropertyType(error)) => {
                assert_eq!(error.index, 1);
                assert_eq!(error.key, "height");
            }
            other => panic!("Expected an unsupported property error, got {:?}", other),
        }
    }

    #[test]
    fn test_defective_records_are_skippable() {
        let records = vec![
            DecodedRecord::defective(0, GeometryDefect::RingNotClosed),
            point_record(1, 1.0, 1.0),
        ];
        let batch = normalize_records(records, InvalidGeometryPolicy::Skip).unwrap();
        assert_eq!(batch.features.len(), 1);
        assert_eq!(batch.skipped[0].reason, GeometryDefect::RingNotClosed);
    }
}
