use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

use super::geodesic::is_within_distance;
use crate::geofile::geojson::{geometry_from_geojson, geometry_to_geojson};
use crate::normalize::validate_geometry;

fn user_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(error))
}

fn geometry_argument(context: &Context<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    context.get::<Option<String>>(index)
}

/// Register the PostGIS-style functions the store queries rely on:
///
/// - `ST_GeomFromGeoJSON(text)` parses and validates GeoJSON geometry text and
///   returns its canonical form. Invalid input raises an SQL error, so the
///   insert that used it fails.
/// - `ST_AsGeoJSON(geom)` returns the canonical GeoJSON text of a stored
///   geometry. Text that cannot be parsed is returned unchanged for the caller
///   to deal with.
/// - `ST_DWithin(geom, lon, lat, radius_meters)` is true when the geometry lies
///   within the geodesic radius of the point. Unparseable geometries never match.
pub fn register_spatial_functions(connection: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    connection.create_scalar_function("ST_GeomFromGeoJSON", 1, flags, |context| {
        let text = match geometry_argument(context, 0)? {
            Some(text) => text,
            None => return Ok(None),
        };
        let geometry = geometry_from_geojson(&text).map_err(user_error)?;
        validate_geometry(&geometry).map_err(user_error)?;
        Ok(Some(geometry_to_geojson(&geometry)))
    })?;

    connection.create_scalar_function("ST_AsGeoJSON", 1, flags, |context| {
        Ok(geometry_argument(context, 0)?.map(|text| match geometry_from_geojson(&text) {
            Ok(geometry) => geometry_to_geojson(&geometry),
            Err(_) => text,
        }))
    })?;

    connection.create_scalar_function("ST_DWithin", 4, flags, |context| {
        let text = geometry_argument(context, 0)?;
        let lon: f64 = context.get(1)?;
        let lat: f64 = context.get(2)?;
        let radius_meters: f64 = context.get(3)?;
        let geometry = match text.map(|text| geometry_from_geojson(&text)) {
            Some(Ok(geometry)) => geometry,
            _ => return Ok(false),
        };
        Ok(is_within_distance(
            &geometry,
            &geo::Point::new(lon, lat),
            radius_meters,
        ))
    })?;

    Ok(())
}
