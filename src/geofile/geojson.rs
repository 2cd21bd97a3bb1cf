use std::{fs, io, path::Path};

use thiserror::Error;

use super::feature::Feature;
use crate::store::RowId;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("geometry is not valid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("GeoJSON geometry cannot be converted: {0}")]
    Conversion(#[from] geojson::Error),
}

/// GeoJSON text of a geometry, as handed to the store's `ST_GeomFromGeoJSON`.
pub fn geometry_to_geojson(geometry: &geo::Geometry) -> String {
    geojson::Geometry::new(geojson::Value::from(geometry)).to_string()
}

/// Parse GeoJSON geometry text as returned by the store's `ST_AsGeoJSON`.
pub fn geometry_from_geojson(text: &str) -> Result<geo::Geometry, ExchangeError> {
    let geometry: geojson::Geometry = serde_json::from_str(text)?;
    Ok(geo::Geometry::try_from(geometry)?)
}

pub fn feature_to_geojson(feature: &Feature, id: Option<RowId>) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&feature.geometry))),
        id: id.map(|id| geojson::feature::Id::Number(id.into())),
        properties: Some(feature.properties.clone()),
        foreign_members: None,
    }
}

pub fn write_feature_collection(
    feature_collection: &geojson::FeatureCollection,
    output_filepath: &Path,
) -> io::Result<()> {
    let geojson_contents = geojson::GeoJson::from(feature_collection.clone());
    fs::write(output_filepath, geojson_contents.to_string())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testdir::testdir;

    use super::{geometry_from_geojson, geometry_to_geojson, write_feature_collection};

    fn square_with_hole() -> geo::Polygon {
        geo::Polygon::new(
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)].into(),
            vec![vec![(2.0, 2.0), (2.0, 4.0), (4.0, 4.0), (4.0, 2.0), (2.0, 2.0)].into()],
        )
    }

    #[rstest]
    #[case(geo::Geometry::Point(geo::Point::new(139.813385, 35.707317999)))]
    #[case(geo::Geometry::LineString(vec![(0.1, 0.2), (1.0 / 3.0, 2.0 / 3.0)].into()))]
    #[case(geo::Geometry::Polygon(square_with_hole()))]
    #[case(geo::Geometry::MultiPoint(vec![(1.0, 2.0), (-179.999999999, 89.123456789)].into()))]
    #[case(geo::Geometry::MultiPolygon(geo::MultiPolygon::new(vec![square_with_hole()])))]
    fn test_geometry_round_trips_through_geojson(#[case] geometry: geo::Geometry) {
        let text = geometry_to_geojson(&geometry);
        let parsed = geometry_from_geojson(&text).unwrap();
        assert_eq!(parsed, geometry);
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"type": "Point"}"#)]
    #[case(r#"{"type": "Circle", "coordinates": [0, 0]}"#)]
    fn test_unparseable_geojson_is_an_error(#[case] text: &str) {
        assert!(geometry_from_geojson(text).is_err());
    }

    #[test]
    fn test_write_feature_collection() {
        let feature_collection: geojson::FeatureCollection = [geo::Point::new(1.0, 2.0)]
            .iter()
            .map(|point| geojson::Feature::from(geojson::Geometry::from(point)))
            .collect();
        let output_filepath = testdir!().join("points.geojson");
        write_feature_collection(&feature_collection, &output_filepath).unwrap();

        let contents = std::fs::read_to_string(&output_filepath).unwrap();
        match contents.parse::<geojson::GeoJson>().unwrap() {
            geojson::GeoJson::FeatureCollection(parsed) => assert_eq!(parsed.features.len(), 1),
            other => panic!("Expected a feature collection, got {}", other),
        }
    }
}
