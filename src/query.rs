//! Read side: stored rows back to GeoJSON feature collections.

use crate::error::{InvalidQueryError, Result, StoreUnavailableError};
use crate::geofile::feature::Feature;
use crate::geofile::geojson::{feature_to_geojson, geometry_from_geojson};
use crate::store::{RowId, SpatialStore, StoredRow};

/// A validated WGS84 query location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryPoint {
    lat: f64,
    lon: f64,
}

impl QueryPoint {
    pub fn new(lat: f64, lon: f64) -> std::result::Result<Self, InvalidQueryError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(InvalidQueryError::Latitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(InvalidQueryError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Build a point from raw request parameters.
    pub fn parse(lat: &str, lon: &str) -> std::result::Result<Self, InvalidQueryError> {
        Self::new(parse_number("lat", lat)?, parse_number("lon", lon)?)
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

fn parse_number(name: &'static str, value: &str) -> std::result::Result<f64, InvalidQueryError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| InvalidQueryError::NotANumber {
            name,
            value: value.to_string(),
        })
}

pub fn parse_radius(value: &str) -> std::result::Result<f64, InvalidQueryError> {
    validate_radius(parse_number("radius", value)?)
}

fn validate_radius(radius_meters: f64) -> std::result::Result<f64, InvalidQueryError> {
    if radius_meters.is_finite() && radius_meters >= 0.0 {
        Ok(radius_meters)
    } else {
        Err(InvalidQueryError::Radius(radius_meters))
    }
}

/// A row left out of a collection because its geometry could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub id: RowId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub collection: geojson::FeatureCollection,
    pub skipped_rows: Vec<SkippedRow>,
}

impl QueryOutcome {
    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    /// Row ids of the returned features, in collection order.
    pub fn ids(&self) -> Vec<RowId> {
        self.collection
            .features
            .iter()
            .filter_map(|feature| match &feature.id {
                Some(geojson::feature::Id::Number(id)) => id.as_i64(),
                _ => None,
            })
            .collect()
    }

    /// The returned features without their row ids, e.g. for export.
    pub fn into_features(self) -> Vec<Feature> {
        self.collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let geometry = geo::Geometry::try_from(feature.geometry?).ok()?;
                Some(Feature {
                    geometry,
                    properties: feature.properties.unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn row_to_feature(row: StoredRow) -> std::result::Result<(RowId, Feature), SkippedRow> {
    let id = row.id;
    let text = row.geometry.ok_or_else(|| SkippedRow {
        id,
        reason: "geometry is NULL".to_string(),
    })?;
    let geometry = geometry_from_geojson(&text).map_err(|err| SkippedRow {
        id,
        reason: err.to_string(),
    })?;
    let properties = match row.properties {
        Some(serde_json::Value::Object(properties)) => properties,
        Some(serde_json::Value::Null) | None => serde_json::Map::new(),
        Some(other) => {
            log::warn!("Row {} has non-object properties {}, dropping them", id, other);
            serde_json::Map::new()
        }
    };
    Ok((
        id,
        Feature {
            geometry,
            properties,
        },
    ))
}

fn assemble(rows: Vec<StoredRow>) -> QueryOutcome {
    let mut features = Vec::with_capacity(rows.len());
    let mut skipped_rows = Vec::new();
    for row in rows {
        match row_to_feature(row) {
            Ok((id, feature)) => features.push(feature_to_geojson(&feature, Some(id))),
            Err(skipped) => {
                log::warn!("Skipping row {}: {}", skipped.id, skipped.reason);
                skipped_rows.push(skipped);
            }
        }
    }
    QueryOutcome {
        collection: geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        },
        skipped_rows,
    }
}

/// Every stored feature.
pub fn list_all<S: SpatialStore + ?Sized>(store: &mut S) -> Result<QueryOutcome> {
    let rows = store
        .select_all()
        .map_err(|source| StoreUnavailableError { source })?;
    log::debug!("Read {} rows", rows.len());
    Ok(assemble(rows))
}

/// Features whose geometry lies within `radius_meters` of `point`, measured on
/// the WGS84 ellipsoid.
pub fn list_near<S: SpatialStore + ?Sized>(
    store: &mut S,
    point: QueryPoint,
    radius_meters: f64,
) -> Result<QueryOutcome> {
    let radius_meters = validate_radius(radius_meters)?;
    let rows = store
        .select_within(point.lon, point.lat, radius_meters)
        .map_err(|source| StoreUnavailableError { source })?;
    log::debug!(
        "{} rows within {} m of ({}, {})",
        rows.len(),
        radius_meters,
        point.lat,
        point.lon
    );
    Ok(assemble(rows))
}

/// Validate raw coordinates, then query. Nothing reaches the store unless
/// every parameter is valid.
pub fn list_near_coordinates<S: SpatialStore + ?Sized>(
    store: &mut S,
    lat: f64,
    lon: f64,
    radius_meters: f64,
) -> Result<QueryOutcome> {
    let point = QueryPoint::new(lat, lon)?;
    list_near(store, point, radius_meters)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::{list_all, list_near, list_near_coordinates, parse_radius, QueryPoint};
    use crate::error::{Error, InvalidQueryError};
    use crate::store::{SpatialStore, SqliteStore, StoreError, StoreSession, StoredRow};

    fn store_with_points(points: &[(f64, f64)]) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let mut session = store.begin().unwrap();
        for (i, (lon, lat)) in points.iter().enumerate() {
            let geometry = format!(r#"{{"type":"Point","coordinates":[{},{}]}}"#, lon, lat);
            session.insert(&geometry, &json!({ "n": i })).unwrap();
        }
        session.commit().unwrap();
        store
    }

    #[test]
    fn test_point_at_origin_is_near_origin_only() {
        let mut store = store_with_points(&[(0.0, 0.0)]);

        let near = list_near(&mut store, QueryPoint::new(0.0, 0.0).unwrap(), 1_000.0).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near.collection.features[0].property("n"), Some(&json!(0)));

        let far = list_near(&mut store, QueryPoint::new(10.0, 10.0).unwrap(), 1_000.0).unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn test_zero_radius_returns_only_coincident_points() {
        let mut store = store_with_points(&[(1.0, 1.0), (1.0, 1.0001), (2.0, 2.0)]);
        let outcome = list_near(&mut store, QueryPoint::new(1.0, 1.0).unwrap(), 0.0).unwrap();
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.collection.features[0].property("n"), Some(&json!(0)));
    }

    #[test]
    fn test_results_grow_with_radius() {
        let mut store = store_with_points(&[
            (0.0, 0.0),
            (0.001, 0.0),
            (0.01, 0.0),
            (0.1, 0.0),
            (1.0, 0.0),
        ]);
        let point = QueryPoint::new(0.0, 0.0).unwrap();
        let mut previous: Vec<i64> = Vec::new();
        for radius in [0.0, 50.0, 500.0, 5_000.0, 50_000.0, 500_000.0] {
            let ids = list_near(&mut store, point, radius).unwrap().ids();
            assert!(previous.iter().all(|id| ids.contains(id)));
            assert!(ids.len() >= previous.len());
            previous = ids;
        }
        assert_eq!(previous.len(), 5);
    }

    #[test]
    fn test_list_all_carries_row_ids_and_properties() {
        let mut store = store_with_points(&[(139.813385, 35.707318), (-73.98, 40.75)]);
        let outcome = list_all(&mut store).unwrap();
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.ids().len(), 2);
        assert_eq!(outcome.collection.features[1].property("n"), Some(&json!(1)));

        let features = outcome.into_features();
        assert_eq!(
            features[0].geometry,
            geo::Geometry::Point(geo::Point::new(139.813385, 35.707318))
        );
        assert_eq!(features[1].properties["n"], json!(1));
    }

    #[test]
    fn test_degraded_rows_are_skipped() {
        let mut store = store_with_points(&[(0.0, 0.0)]);
        store
            .connection()
            .execute_batch(
                "INSERT INTO features (geom, properties) VALUES (NULL, '{}');
                 INSERT INTO features (geom, properties) VALUES ('garbage', '{}');",
            )
            .unwrap();

        let outcome = list_all(&mut store).unwrap();
        assert_eq!(outcome.len(), 1);
        assert_eq!(outcome.skipped_rows.len(), 2);
    }

    /// Store that fails the test if any query reaches it.
    struct UntouchableStore;

    impl SpatialStore for UntouchableStore {
        fn ensure_schema(&mut self) -> Result<(), StoreError> {
            panic!("store touched")
        }

        fn begin(&mut self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
            panic!("store touched")
        }

        fn select_all(&mut self) -> Result<Vec<StoredRow>, StoreError> {
            panic!("store touched")
        }

        fn select_within(&mut self, _: f64, _: f64, _: f64) -> Result<Vec<StoredRow>, StoreError> {
            panic!("store touched")
        }
    }

    #[rstest]
    #[case(200.0, 0.0, 10.0)]
    #[case(-90.5, 0.0, 10.0)]
    #[case(0.0, 180.5, 10.0)]
    #[case(f64::NAN, 0.0, 10.0)]
    #[case(0.0, 0.0, -1.0)]
    #[case(0.0, 0.0, f64::INFINITY)]
    fn test_invalid_parameters_never_reach_the_store(
        #[case] lat: f64,
        #[case] lon: f64,
        #[case] radius: f64,
    ) {
        assert!(matches!(
            list_near_coordinates(&mut UntouchableStore, lat, lon, radius),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_parse_request_parameters() {
        let point = QueryPoint::parse("35.7", " 139.8").unwrap();
        assert_eq!((point.lat(), point.lon()), (35.7, 139.8));
        assert!(matches!(
            QueryPoint::parse("north", "0"),
            Err(InvalidQueryError::NotANumber { name: "lat", .. })
        ));
        assert_eq!(parse_radius("250"), Ok(250.0));
        assert_eq!(parse_radius("-1"), Err(InvalidQueryError::Radius(-1.0)));
    }
}
