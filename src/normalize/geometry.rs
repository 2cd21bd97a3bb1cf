use geo::winding_order::Winding;
use geo::CoordsIter;

use crate::error::GeometryDefect;

/// Structural checks every stored geometry has to pass: finite coordinates,
/// line strings with at least two positions, rings of at least four positions
/// and a determinable ring winding. Only the six simple-feature kinds (points,
/// lines, polygons and their multi variants) are accepted.
///
/// Ring closure is guaranteed by `geo::Polygon` itself. Open rings in the
/// source are caught by the decoder before conversion.
pub fn validate_geometry(geometry: &geo::Geometry) -> Result<(), GeometryDefect> {
    if let Some(coord) = geometry
        .coords_iter()
        .find(|coord| !(coord.x.is_finite() && coord.y.is_finite()))
    {
        return Err(GeometryDefect::NonFiniteCoordinate {
            x: coord.x,
            y: coord.y,
        });
    }
    match geometry {
        geo::Geometry::Point(_) => Ok(()),
        geo::Geometry::LineString(line) => validate_line(line),
        geo::Geometry::Polygon(polygon) => validate_polygon(polygon),
        geo::Geometry::MultiPoint(points) => {
            if points.0.is_empty() {
                return Err(GeometryDefect::Empty);
            }
            Ok(())
        }
        geo::Geometry::MultiLineString(lines) => {
            if lines.0.is_empty() {
                return Err(GeometryDefect::Empty);
            }
            lines.iter().try_for_each(validate_line)
        }
        geo::Geometry::MultiPolygon(polygons) => {
            if polygons.0.is_empty() {
                return Err(GeometryDefect::Empty);
            }
            polygons.iter().try_for_each(validate_polygon)
        }
        other => Err(GeometryDefect::UnsupportedKind(geometry_kind(other))),
    }
}

/// Validate and orient polygon rings the GeoJSON way: exterior rings
/// counter-clockwise, holes clockwise.
pub fn canonicalize_geometry(geometry: geo::Geometry) -> Result<geo::Geometry, GeometryDefect> {
    validate_geometry(&geometry)?;
    Ok(match geometry {
        geo::Geometry::Polygon(polygon) => geo::Geometry::Polygon(orient_polygon(polygon)),
        geo::Geometry::MultiPolygon(polygons) => geo::Geometry::MultiPolygon(
            polygons.into_iter().map(orient_polygon).collect(),
        ),
        other => other,
    })
}

pub fn geometry_kind(geometry: &geo::Geometry) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

fn validate_line(line: &geo::LineString) -> Result<(), GeometryDefect> {
    match line.0.len() {
        0 => Err(GeometryDefect::Empty),
        1 => Err(GeometryDefect::TooFewPositions(1)),
        _ => Ok(()),
    }
}

fn validate_polygon(polygon: &geo::Polygon) -> Result<(), GeometryDefect> {
    if polygon.exterior().0.is_empty() {
        return Err(GeometryDefect::Empty);
    }
    validate_ring(polygon.exterior())?;
    polygon.interiors().iter().try_for_each(validate_ring)
}

fn validate_ring(ring: &geo::LineString) -> Result<(), GeometryDefect> {
    if ring.0.len() < 4 {
        return Err(GeometryDefect::RingTooShort(ring.0.len()));
    }
    if ring.winding_order().is_none() {
        return Err(GeometryDefect::IndeterminateWinding);
    }
    Ok(())
}

fn orient_polygon(polygon: geo::Polygon) -> geo::Polygon {
    let (mut exterior, mut interiors) = polygon.into_inner();
    exterior.make_ccw_winding();
    for ring in interiors.iter_mut() {
        ring.make_cw_winding();
    }
    geo::Polygon::new(exterior, interiors)
}
