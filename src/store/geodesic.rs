use geo::{CoordsIter, GeodesicDistance, Intersects, LinesIter};

/// Slack added to the radius so that coincident points still match at radius 0
/// after floating point round trips.
pub const DISTANCE_TOLERANCE_METERS: f64 = 1e-6;

/// Evenly spaced samples taken along a segment before refining the minimum.
const SEGMENT_SAMPLES: usize = 32;
const REFINE_ITERATIONS: usize = 60;

/// Geodesic (WGS84 ellipsoid) distance in meters from `point` to the nearest
/// part of `geometry`. Both are lon/lat.
///
/// Points that touch or lie inside the geometry are at distance zero. Edges are
/// straight lines in lon/lat, the same model `intersects` uses, and the distance
/// to each edge is minimized on the ellipsoid along its whole length.
pub fn geodesic_distance_to_point(geometry: &geo::Geometry, point: &geo::Point) -> f64 {
    if geometry.intersects(point) {
        return 0.0;
    }
    let nearest_vertex = geometry
        .coords_iter()
        .map(|coord| geo::Point::from(coord).geodesic_distance(point))
        .fold(f64::INFINITY, f64::min);
    segments(geometry)
        .iter()
        .map(|segment| distance_to_segment(segment, point))
        .fold(nearest_vertex, f64::min)
}

fn segments(geometry: &geo::Geometry) -> Vec<geo::Line> {
    match geometry {
        geo::Geometry::Point(_) | geo::Geometry::MultiPoint(_) => Vec::new(),
        geo::Geometry::Line(line) => vec![*line],
        geo::Geometry::LineString(line_string) => line_string.lines_iter().collect(),
        geo::Geometry::MultiLineString(lines) => lines.lines_iter().collect(),
        geo::Geometry::Polygon(polygon) => polygon.lines_iter().collect(),
        geo::Geometry::MultiPolygon(polygons) => polygons.lines_iter().collect(),
        geo::Geometry::Rect(rect) => rect.lines_iter().collect(),
        geo::Geometry::Triangle(triangle) => triangle.lines_iter().collect(),
        geo::Geometry::GeometryCollection(collection) => {
            collection.iter().flat_map(segments).collect()
        }
    }
}

/// Minimum over `t` in [0, 1] of the distance from `point` to `start + t * (end - start)`.
///
/// The coarse samples bracket the minimum, then a golden-section search
/// narrows it down.
fn distance_to_segment(segment: &geo::Line, point: &geo::Point) -> f64 {
    let distance_at = |t: f64| {
        let coord = segment.start + segment.delta() * t;
        geo::Point::from(coord).geodesic_distance(point)
    };
    let samples: Vec<f64> = (0..=SEGMENT_SAMPLES)
        .map(|i| distance_at(i as f64 / SEGMENT_SAMPLES as f64))
        .collect();
    let (best, best_distance) = samples
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, d)| if d < acc.1 { (i, d) } else { acc });

    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let mut low = best.saturating_sub(1) as f64 / SEGMENT_SAMPLES as f64;
    let mut high = (best + 1).min(SEGMENT_SAMPLES) as f64 / SEGMENT_SAMPLES as f64;
    let mut x1 = high - ratio * (high - low);
    let mut x2 = low + ratio * (high - low);
    let mut f1 = distance_at(x1);
    let mut f2 = distance_at(x2);
    for _ in 0..REFINE_ITERATIONS {
        if f1 <= f2 {
            high = x2;
            x2 = x1;
            f2 = f1;
            x1 = high - ratio * (high - low);
            f1 = distance_at(x1);
        } else {
            low = x1;
            x1 = x2;
            f1 = f2;
            x2 = low + ratio * (high - low);
            f2 = distance_at(x2);
        }
    }
    best_distance.min(f1).min(f2)
}

pub fn is_within_distance(geometry: &geo::Geometry, point: &geo::Point, radius_meters: f64) -> bool {
    geodesic_distance_to_point(geometry, point) <= radius_meters + DISTANCE_TOLERANCE_METERS
}
