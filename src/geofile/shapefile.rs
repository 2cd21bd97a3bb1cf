//! Shapefile bundle decoding.
//!
//! A bundle is a set of sibling files sharing one stem: the `.shp` geometry,
//! `.shx` index and `.dbf` attribute components are mandatory, the `.prj`
//! projection is optional. Bundles arrive either as zip archive bytes or as a
//! path (a `.zip`, a `.shp` or a directory holding the components).

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use gdal::vector::{LayerAccess, OGRwkbGeometryType};

use super::feature::{AttributeValue, DecodedRecord};
use crate::crs::crs_utils::{projection_to_wgs84, reproject_geometry, SourceCrs};
use crate::error::{DecodeError, GeometryDefect};

const SHP_FILE_CODE: i32 = 9994;
const SHP_HEADER_LENGTH: u64 = 100;

/// Where a bundle comes from.
#[derive(Debug, Clone)]
pub enum BundleSource {
    /// Zip archive contents, as received from an upload.
    Archive(Vec<u8>),
    Path(PathBuf),
}

impl From<PathBuf> for BundleSource {
    fn from(path: PathBuf) -> Self {
        BundleSource::Path(path)
    }
}

impl From<Vec<u8>> for BundleSource {
    fn from(bytes: Vec<u8>) -> Self {
        BundleSource::Archive(bytes)
    }
}

/// All records of a bundle, in EPSG:4326.
#[derive(Debug)]
pub struct DecodedBundle {
    pub records: Vec<DecodedRecord>,
    /// The bundle had no `.prj`, its coordinates were taken as EPSG:4326.
    pub crs_assumed: bool,
    /// CRS the coordinates were declared in, `None` when assumed.
    pub source_crs: Option<SourceCrs>,
}

/// Paths of the components of one bundle.
#[derive(Debug, Clone, PartialEq)]
struct BundleComponents {
    shp: PathBuf,
    shx: PathBuf,
    dbf: PathBuf,
    prj: Option<PathBuf>,
}

pub fn decode_bundle(source: &BundleSource) -> Result<DecodedBundle, DecodeError> {
    match source {
        BundleSource::Archive(bytes) => decode_archive(bytes),
        BundleSource::Path(path) => decode_path(path),
    }
}

fn decode_archive(bytes: &[u8]) -> Result<DecodedBundle, DecodeError> {
    // The directory lives until decoding is done, GDAL reads from it lazily.
    let extract_dir = tempfile::tempdir()?;
    extract_archive(bytes, extract_dir.path())?;
    decode_directory(extract_dir.path())
}

fn decode_path(path: &Path) -> Result<DecodedBundle, DecodeError> {
    if path.is_dir() {
        return decode_directory(path);
    }
    match lowercase_extension(path).as_deref() {
        Some("zip") => decode_archive(&fs::read(path)?),
        Some("shp") => {
            let components = find_components(path)?;
            decode_components(&components)
        }
        _ => Err(DecodeError::MissingComponent("shp")),
    }
}

fn decode_directory(directory: &Path) -> Result<DecodedBundle, DecodeError> {
    let shp_files: Vec<PathBuf> = list_files(directory)?
        .into_iter()
        .filter(|path| lowercase_extension(path).as_deref() == Some("shp"))
        .collect();
    match shp_files.as_slice() {
        [] => Err(DecodeError::MissingComponent("shp")),
        [shp] => decode_components(&find_components(shp)?),
        many => Err(DecodeError::AmbiguousBundle(many.len())),
    }
}

/// Extract the files of a zip archive into `target`. Directory components of
/// entry names are dropped, macOS resource forks are ignored. Two entries with
/// the same file name make the archive ambiguous.
fn extract_archive(bytes: &[u8], target: &Path) -> Result<(), DecodeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    log::debug!("Extracting {} archive entries", archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() || entry.name().starts_with("__MACOSX/") {
            continue;
        }
        let file_name = match Path::new(entry.name()).file_name() {
            Some(file_name) => file_name.to_owned(),
            None => continue,
        };
        let mut output = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target.join(&file_name))
        {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                log::warn!("Archive holds more than one {:?}", file_name);
                return Err(DecodeError::AmbiguousBundle(2));
            }
            Err(err) => return Err(err.into()),
        };
        io::copy(&mut entry, &mut output)?;
    }
    Ok(())
}

fn list_files(directory: &Path) -> Result<Vec<PathBuf>, DecodeError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
}

/// Locate the siblings of a `.shp` file. Extensions match case-insensitively.
fn find_components(shp: &Path) -> Result<BundleComponents, DecodeError> {
    let directory = shp
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = shp.file_stem().ok_or(DecodeError::MissingComponent("shp"))?;
    let siblings: Vec<PathBuf> = list_files(directory)?
        .into_iter()
        .filter(|path| path.file_stem() == Some(stem))
        .collect();
    let sibling = |extension: &str| {
        siblings
            .iter()
            .find(|path| lowercase_extension(path).as_deref() == Some(extension))
            .cloned()
    };
    Ok(BundleComponents {
        shp: shp.to_path_buf(),
        shx: sibling("shx").ok_or(DecodeError::MissingComponent("shx"))?,
        dbf: sibling("dbf").ok_or(DecodeError::MissingComponent("dbf"))?,
        prj: sibling("prj"),
    })
}

/// Check the fixed 100 byte header of the `.shp` main file: file code, declared
/// length against the real length, and the shape type.
fn check_shp_header(shp: &Path) -> Result<(), DecodeError> {
    let actual_length = fs::metadata(shp)?.len();
    if actual_length < SHP_HEADER_LENGTH {
        return Err(DecodeError::Truncated {
            path: shp.to_path_buf(),
            reason: format!("{} bytes, the header alone is 100", actual_length),
        });
    }
    let mut header = [0u8; SHP_HEADER_LENGTH as usize];
    fs::File::open(shp)?.read_exact(&mut header)?;

    let file_code = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if file_code != SHP_FILE_CODE {
        return Err(DecodeError::Malformed {
            path: shp.to_path_buf(),
            reason: format!("file code {} instead of {}", file_code, SHP_FILE_CODE),
        });
    }
    // Declared in 16-bit words.
    let declared_words = i32::from_be_bytes([header[24], header[25], header[26], header[27]]);
    if declared_words < 0 {
        return Err(DecodeError::Malformed {
            path: shp.to_path_buf(),
            reason: format!("negative file length {}", declared_words),
        });
    }
    let declared_length = declared_words as u64 * 2;
    if actual_length < declared_length {
        return Err(DecodeError::Truncated {
            path: shp.to_path_buf(),
            reason: format!(
                "{} bytes, the header declares {}",
                actual_length, declared_length
            ),
        });
    }
    let shape_type = i32::from_le_bytes([header[32], header[33], header[34], header[35]]);
    match shape_type {
        0 | 1 | 3 | 5 | 8 | 11 | 13 | 15 | 18 | 21 | 23 | 25 | 28 => Ok(()),
        31 => Err(DecodeError::UnsupportedGeometry("MultiPatch".to_string())),
        other => Err(DecodeError::UnsupportedGeometry(format!(
            "shape type {}",
            other
        ))),
    }
}

fn read_source_crs(components: &BundleComponents) -> Result<Option<SourceCrs>, DecodeError> {
    let prj = match &components.prj {
        Some(prj) => prj,
        None => return Ok(None),
    };
    let contents = fs::read_to_string(prj)?;
    if contents.trim().is_empty() {
        log::warn!("{:?} is empty, ignoring it", prj);
        return Ok(None);
    }
    Ok(Some(SourceCrs::from_prj(&contents)?))
}

fn decode_components(components: &BundleComponents) -> Result<DecodedBundle, DecodeError> {
    log::debug!(
        "Decoding {:?} (index {:?}, attributes {:?})",
        components.shp,
        components.shx,
        components.dbf
    );
    check_shp_header(&components.shp)?;
    let source_crs = read_source_crs(components)?;
    let crs_assumed = source_crs.is_none();
    if crs_assumed {
        log::warn!(
            "{:?} has no usable .prj, assuming coordinates are EPSG:4326",
            components.shp
        );
    }

    let mut records = read_records(&components.shp)?;

    if let Some(crs) = source_crs.as_ref().filter(|crs| !crs.is_wgs84()) {
        log::info!("Reprojecting {} records from {} to EPSG:4326", records.len(), crs);
        let projection = projection_to_wgs84(crs)?;
        for record in records.iter_mut() {
            if let Ok(geometry) = record.geometry.as_mut() {
                reproject_geometry(geometry, &projection)?;
            }
        }
    }

    Ok(DecodedBundle {
        records,
        crs_assumed,
        source_crs,
    })
}

fn read_records(shp: &Path) -> Result<Vec<DecodedRecord>, DecodeError> {
    let mut open_options = gdal::DatasetOptions::default();
    open_options.open_flags = gdal::GdalOpenFlags::GDAL_OF_VECTOR;
    open_options.allowed_drivers = Some(&["ESRI Shapefile"][..]);
    let dataset = gdal::Dataset::open_ex(shp, open_options)?;
    let mut layer = dataset.layer(0)?;
    let expected_count = layer.feature_count();

    let mut records = Vec::new();
    for (index, feature) in layer.features().enumerate() {
        let geometry = match feature.geometry_by_index(0).ok() {
            Some(geometry) => convert_geometry(geometry)?,
            None => Err(GeometryDefect::Missing),
        };
        let attributes = feature
            .fields()
            .map(|(name, value)| {
                let value = value.map(AttributeValue::from).unwrap_or(AttributeValue::Null);
                (name, value)
            })
            .collect();
        records.push(DecodedRecord {
            index,
            geometry,
            attributes,
        });
    }

    if (records.len() as u64) < expected_count {
        return Err(DecodeError::Truncated {
            path: shp.to_path_buf(),
            reason: format!(
                "read {} of {} records",
                records.len(),
                expected_count
            ),
        });
    }
    log::info!("Decoded {} records from {:?}", records.len(), shp);
    Ok(records)
}

/// Convert a GDAL geometry to a 2D `geo::Geometry`. The outer error fails the
/// bundle, the inner one marks just this record as defective.
fn convert_geometry(
    geometry: &gdal::vector::Geometry,
) -> Result<Result<geo::Geometry, GeometryDefect>, DecodeError> {
    if unsafe { gdal_sys::OGR_G_IsEmpty(geometry.c_geometry()) } != 0 {
        return Ok(Err(GeometryDefect::Empty));
    }
    // geo closes rings on construction, open ones have to be caught here.
    if has_open_ring(geometry) {
        return Ok(Err(GeometryDefect::RingNotClosed));
    }

    let flat = geometry.clone();
    unsafe {
        gdal_sys::OGR_G_FlattenTo2D(flat.c_geometry());
    }
    let wkb = flat.wkb()?;
    let converted = wkb::wkb_to_geom(&mut wkb.as_slice()).map_err(|err| {
        DecodeError::UnsupportedGeometry(format!("{} ({:?})", gdal::vector::geometry_type_to_name(geometry.geometry_type()), err))
    })?;
    match converted {
        geo::Geometry::Point(_)
        | geo::Geometry::LineString(_)
        | geo::Geometry::Polygon(_)
        | geo::Geometry::MultiPoint(_)
        | geo::Geometry::MultiLineString(_)
        | geo::Geometry::MultiPolygon(_) => Ok(Ok(converted)),
        _ => Err(DecodeError::UnsupportedGeometry(gdal::vector::geometry_type_to_name(geometry.geometry_type()))),
    }
}

fn has_open_ring(geometry: &gdal::vector::Geometry) -> bool {
    let geometry_type = unsafe { gdal_sys::OGR_GT_Flatten(geometry.geometry_type()) };
    match geometry_type {
        OGRwkbGeometryType::wkbPolygon => (0..geometry.geometry_count()).any(|index| {
            let points = geometry.get_geometry(index).get_point_vec();
            match (points.first(), points.last()) {
                (Some(first), Some(last)) => first.0 != last.0 || first.1 != last.1,
                _ => false,
            }
        }),
        OGRwkbGeometryType::wkbMultiPolygon => (0..geometry.geometry_count())
            .any(|index| has_open_ring(&geometry.get_geometry(index))),
        _ => false,
    }
}
