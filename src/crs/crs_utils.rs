use gdal::errors::GdalError;
use gdal::spatial_ref::SpatialRef;
use proj::Transform;

use crate::error::DecodeError;

pub type EpsgCode = u32;

pub const WGS84_EPSG_CODE: EpsgCode = 4326;

pub fn epsg_4326() -> Result<SpatialRef, GdalError> {
    SpatialRef::from_epsg(WGS84_EPSG_CODE)
}

pub fn epsg_code_to_authority_string(code: EpsgCode) -> String {
    format!("EPSG:{}", code)
}

/// Coordinate reference system declared by a bundle's `.prj` component.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCrs {
    Wgs84,
    Epsg(EpsgCode),
    /// A definition GDAL could not match to an EPSG code, kept as WKT.
    Wkt(String),
}

impl SourceCrs {
    /// Identify the CRS of an ESRI `.prj` definition.
    pub fn from_prj(contents: &str) -> Result<Self, DecodeError> {
        let mut spatial_ref = SpatialRef::from_esri(contents.trim())?;
        if let Err(err) = spatial_ref.auto_identify_epsg() {
            log::debug!("Could not auto-identify EPSG code of .prj: {}", err);
        }
        let authority = spatial_ref.auth_name().ok();
        match (authority.as_deref(), spatial_ref.auth_code()) {
            (Some("EPSG"), Ok(code)) if code as EpsgCode == WGS84_EPSG_CODE => Ok(SourceCrs::Wgs84),
            (Some("EPSG"), Ok(code)) => Ok(SourceCrs::Epsg(code as EpsgCode)),
            _ => Ok(SourceCrs::Wkt(spatial_ref.to_wkt()?)),
        }
    }

    pub fn is_wgs84(&self) -> bool {
        matches!(self, SourceCrs::Wgs84)
    }

    /// Definition string understood by PROJ.
    pub fn definition(&self) -> String {
        match self {
            SourceCrs::Wgs84 => epsg_code_to_authority_string(WGS84_EPSG_CODE),
            SourceCrs::Epsg(code) => epsg_code_to_authority_string(*code),
            SourceCrs::Wkt(wkt) => wkt.clone(),
        }
    }
}

impl std::fmt::Display for SourceCrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceCrs::Wkt(_) => write!(f, "custom WKT CRS"),
            other => write!(f, "{}", other.definition()),
        }
    }
}

/// Projection from `from` to WGS84 longitude/latitude.
pub fn projection_to_wgs84(from: &SourceCrs) -> Result<proj::Proj, DecodeError> {
    proj::Proj::new_known_crs(
        &from.definition(),
        &epsg_code_to_authority_string(WGS84_EPSG_CODE),
        None,
    )
    .map_err(|err| DecodeError::Reprojection(err.to_string()))
}

pub fn reproject_geometry(
    geometry: &mut geo::Geometry,
    projection: &proj::Proj,
) -> Result<(), DecodeError> {
    geometry
        .transform(projection)
        .map_err(|err| DecodeError::Reprojection(err.to_string()))
}
