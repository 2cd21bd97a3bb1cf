//! Error types for the ingestion and query pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or unsupported shapefile bundle.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bundle is missing its .{0} component")]
    MissingComponent(&'static str),

    #[error("bundle contains {0} .shp files, expected exactly one")]
    AmbiguousBundle(usize),

    #[error("could not read zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{path:?} is truncated: {reason}")]
    Truncated { path: PathBuf, reason: String },

    #[error("{path:?} is not a valid shapefile: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("unsupported geometry type {0}")]
    UnsupportedGeometry(String),

    #[error("could not reproject to EPSG:4326: {0}")]
    Reprojection(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structurally invalid geometry on a single record.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("record {index}: {reason}")]
pub struct InvalidGeometryError {
    pub index: usize,
    pub reason: GeometryDefect,
}

/// What exactly is wrong with a geometry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryDefect {
    #[error("geometry is missing")]
    Missing,
    #[error("geometry is empty")]
    Empty,
    #[error("coordinate ({x}, {y}) is not finite")]
    NonFiniteCoordinate { x: f64, y: f64 },
    #[error("line string has {0} positions, at least 2 are required")]
    TooFewPositions(usize),
    #[error("ring has {0} positions, at least 4 are required")]
    RingTooShort(usize),
    #[error("ring is not closed")]
    RingNotClosed,
    #[error("ring winding order cannot be determined")]
    IndeterminateWinding,
    #[error("geometry type {0} is not supported")]
    UnsupportedKind(&'static str),
}

/// Attribute value that cannot be represented as JSON.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("record {index}: property {key:?} has a value that is not JSON-serializable ({value})")]
pub struct UnsupportedPropertyTypeError {
    pub index: usize,
    pub key: String,
    pub value: String,
}

/// Store-side failure during a batch insert. The batch has been rolled back.
#[derive(Debug, Error)]
#[error("{}", describe_load_error(.index, .source))]
pub struct LoadError {
    /// Index of the offending feature in the batch, `None` when the commit failed.
    pub index: Option<usize>,
    #[source]
    pub source: StoreError,
}

fn describe_load_error(index: &Option<usize>, source: &StoreError) -> String {
    match index {
        Some(index) => format!("inserting feature {} failed, batch rolled back: {}", index, source),
        None => format!("committing batch failed, batch rolled back: {}", source),
    }
}

/// Query parameters out of range.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidQueryError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("radius {0} must be a finite, non-negative number of meters")]
    Radius(f64),
    #[error("query parameter {name} is not a number: {value:?}")]
    NotANumber { name: &'static str, value: String },
}

/// Connection or session could not be acquired, or a read query failed.
#[derive(Debug, Error)]
#[error("spatial store unavailable: {source}")]
pub struct StoreUnavailableError {
    #[from]
    pub source: StoreError,
}

/// Errors that can occur while ingesting or querying features.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometryError),

    #[error(transparent)]
    UnsupportedPropertyType(#[from] UnsupportedPropertyTypeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    InvalidQuery(#[from] InvalidQueryError),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailableError),
}

impl Error {
    /// HTTP status a boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Decode(_) => 400,
            Error::InvalidQuery(_) => 400,
            Error::InvalidGeometry(_) => 422,
            Error::UnsupportedPropertyType(_) => 422,
            Error::Load(_) => 500,
            Error::StoreUnavailable(_) => 503,
        }
    }

    /// Process exit code used by the command line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Decode(_) => 2,
            Error::InvalidGeometry(_) => 3,
            Error::UnsupportedPropertyType(_) => 4,
            Error::Load(_) => 5,
            Error::InvalidQuery(_) => 6,
            Error::StoreUnavailable(_) => 7,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Decode(_) => "DecodeError",
            Error::InvalidGeometry(_) => "InvalidGeometryError",
            Error::UnsupportedPropertyType(_) => "UnsupportedPropertyTypeError",
            Error::Load(_) => "LoadError",
            Error::InvalidQuery(_) => "InvalidQueryError",
            Error::StoreUnavailable(_) => "StoreUnavailableError",
        }
    }

    /// JSON body in the `{error}` shape used by the upload and query endpoints.
    pub fn to_response_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        })
    }
}
