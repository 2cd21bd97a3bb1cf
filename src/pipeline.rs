//! Upload path: decode a bundle, normalize its records, load them in one batch.

use serde::Serialize;

use crate::error::Result;
use crate::geofile::feature::DecodedRecord;
use crate::geofile::shapefile::{decode_bundle, BundleSource};
use crate::loader::load_features;
use crate::normalize::{normalize_records, InvalidGeometryPolicy, SkippedRecord};
use crate::store::{RowId, SpatialStore};

pub const SUCCESS_MESSAGE: &str = "Shapefile uploaded and data inserted successfully!";

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub on_invalid_geometry: InvalidGeometryPolicy,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub message: &'static str,
    pub decoded: usize,
    pub inserted: Vec<RowId>,
    /// Indices of the records dropped under the skip policy.
    pub skipped: Vec<usize>,
    pub crs_assumed: bool,
}

impl IngestReport {
    /// JSON body in the `{message}` shape of a successful upload.
    pub fn to_response_body(&self) -> serde_json::Value {
        serde_json::json!({
            "message": self.message,
            "inserted": self.inserted.len(),
            "skipped": self.skipped,
            "crs_assumed": self.crs_assumed,
        })
    }
}

pub fn ingest_bundle<S: SpatialStore + ?Sized>(
    source: &BundleSource,
    store: &mut S,
    options: IngestOptions,
) -> Result<IngestReport> {
    let bundle = decode_bundle(source)?;
    let mut report = ingest_records(bundle.records, store, options)?;
    report.crs_assumed = bundle.crs_assumed;
    Ok(report)
}

/// Normalize and load already decoded records.
pub fn ingest_records<S: SpatialStore + ?Sized>(
    records: Vec<DecodedRecord>,
    store: &mut S,
    options: IngestOptions,
) -> Result<IngestReport> {
    let decoded = records.len();
    let batch = normalize_records(records, options.on_invalid_geometry)?;
    let load_report = load_features(store, &batch.features, options.show_progress)?;
    Ok(IngestReport {
        message: SUCCESS_MESSAGE,
        decoded,
        inserted: load_report.inserted,
        skipped: batch
            .skipped
            .iter()
            .map(|SkippedRecord { index, .. }| *index)
            .collect(),
        crs_assumed: false,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use rstest::rstest;
    use serde_json::json;
    use testdir::testdir;

    use super::{ingest_bundle, ingest_records, IngestOptions, SUCCESS_MESSAGE};
    use crate::error::Error;
    use crate::geofile::feature::{AttributeValue, DecodedRecord, Feature};
    use crate::geofile::gdal_geofile::{write_features_to_geofile, GdalDriverType};
    use crate::geofile::geojson::{geometry_from_geojson, geometry_to_geojson};
    use crate::geofile::shapefile::BundleSource;
    use crate::normalize::{canonicalize_geometry, InvalidGeometryPolicy};
    use crate::query::{list_all, list_near, QueryPoint};
    use crate::store::SqliteStore;

    fn point_record(index: usize, x: f64, y: f64) -> DecodedRecord {
        DecodedRecord::new(index, geo::Geometry::Point(geo::Point::new(x, y)))
            .with_attribute("n", AttributeValue::Integer(index as i64))
    }

    fn three_valid_one_nan() -> Vec<DecodedRecord> {
        vec![
            point_record(0, 0.0, 0.0),
            point_record(1, 1.0, 1.0),
            point_record(2, f64::NAN, 2.0),
            point_record(3, 3.0, 3.0),
        ]
    }

    fn options(on_invalid_geometry: InvalidGeometryPolicy) -> IngestOptions {
        IngestOptions {
            on_invalid_geometry,
            show_progress: false,
        }
    }

    #[test]
    fn test_skip_policy_inserts_valid_records() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let report = ingest_records(
            three_valid_one_nan(),
            &mut store,
            options(InvalidGeometryPolicy::Skip),
        )
        .unwrap();
        assert_eq!(report.message, SUCCESS_MESSAGE);
        assert_eq!(report.decoded, 4);
        assert_eq!(report.inserted.len(), 3);
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(list_all(&mut store).unwrap().len(), 3);
    }

    #[test]
    fn test_abort_policy_inserts_nothing() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let result = ingest_records(
            three_valid_one_nan(),
            &mut store,
            options(InvalidGeometryPolicy::Abort),
        );
        assert!(matches!(result, Err(Error::InvalidGeometry(_))));
        assert_eq!(list_all(&mut store).unwrap().len(), 0);
    }

    #[test]
    fn test_list_all_grows_by_inserted_count() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        ingest_records(
            vec![point_record(0, 5.0, 5.0)],
            &mut store,
            options(InvalidGeometryPolicy::Abort),
        )
        .unwrap();
        let before = list_all(&mut store).unwrap().len();

        let report = ingest_records(
            three_valid_one_nan(),
            &mut store,
            options(InvalidGeometryPolicy::Skip),
        )
        .unwrap();
        let after = list_all(&mut store).unwrap().len();
        assert_eq!(after - before, report.inserted.len());
    }

    fn polygon_with_hole() -> geo::Geometry {
        geo::Geometry::Polygon(geo::Polygon::new(
            vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)].into(),
            vec![vec![(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)].into()],
        ))
    }

    #[rstest]
    #[case(geo::Geometry::Point(geo::Point::new(139.813385, 35.707317999)))]
    #[case(geo::Geometry::LineString(vec![(0.1, 0.2), (1.0 / 3.0, 2.0 / 3.0), (5.5, -7.25)].into()))]
    #[case(polygon_with_hole())]
    fn test_stored_geometry_round_trips(#[case] geometry: geo::Geometry) {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        ingest_records(
            vec![DecodedRecord::new(0, geometry.clone())],
            &mut store,
            options(InvalidGeometryPolicy::Abort),
        )
        .unwrap();

        let outcome = list_all(&mut store).unwrap();
        let stored = outcome.collection.features[0].geometry.clone().unwrap();
        let stored = geo::Geometry::try_from(stored).unwrap();
        let expected = canonicalize_geometry(geometry).unwrap();
        assert_eq!(stored, expected);
        assert_eq!(
            geometry_from_geojson(&geometry_to_geojson(&stored)).unwrap(),
            stored
        );
    }

    #[test]
    fn test_ingest_zipped_shapefile_then_query() {
        let test_dir = testdir!();
        let features = vec![
            Feature {
                geometry: geo::Geometry::Point(geo::Point::new(0.0, 0.0)),
                properties: json!({"name": "origin"}).as_object().unwrap().clone(),
            },
            Feature {
                geometry: geo::Geometry::Point(geo::Point::new(10.0, 10.0)),
                properties: json!({"name": "far"}).as_object().unwrap().clone(),
            },
        ];
        write_features_to_geofile(
            &features,
            &test_dir.join("upload.shp"),
            None,
            GdalDriverType::EsriShapefile,
        )
        .unwrap();

        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for extension in ["shp", "shx", "dbf"] {
            let path = test_dir.join(format!("upload.{}", extension));
            writer
                .start_file(
                    format!("upload.{}", extension.to_uppercase()),
                    zip::write::FileOptions::default(),
                )
                .unwrap();
            writer.write_all(&fs::read(path).unwrap()).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();

        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let report = ingest_bundle(
            &BundleSource::Archive(bytes),
            &mut store,
            options(InvalidGeometryPolicy::Abort),
        )
        .unwrap();
        assert!(report.crs_assumed);
        assert_eq!(report.inserted.len(), 2);
        assert_eq!(report.to_response_body()["message"], SUCCESS_MESSAGE);

        let near = list_near(&mut store, QueryPoint::new(0.0, 0.0).unwrap(), 1_000.0).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near.collection.features[0].property("name"), Some(&json!("origin")));
    }

    #[test]
    fn test_decode_error_leaves_store_untouched() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let result = ingest_bundle(
            &BundleSource::Archive(b"not a zip".to_vec()),
            &mut store,
            options(InvalidGeometryPolicy::Abort),
        );
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(store.count().unwrap(), 0);
    }
}
