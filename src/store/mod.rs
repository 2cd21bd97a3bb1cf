//! Spatial store interface consumed by the loader and the query service.
//!
//! A store persists one row per feature: a surrogate `id`, a `geom` column in
//! EPSG:4326 built from GeoJSON text by the store itself (`ST_GeomFromGeoJSON`)
//! and a JSON `properties` column. Reads hand geometry back as GeoJSON text
//! (`ST_AsGeoJSON`) and proximity filtering is evaluated by the store on
//! geography (ellipsoidal) semantics (`ST_DWithin`).

pub mod geodesic;
pub mod postgis;
pub mod sql_functions;
pub mod sqlite;

use thiserror::Error;

pub use postgis::PostgisStore;
pub use sqlite::SqliteStore;

/// Surrogate identifier assigned by the store on insert.
pub type RowId = i64;

/// Table used when the configuration does not name one.
pub const DEFAULT_TABLE_NAME: &str = "features";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("statement rejected: {0}")]
    Rejected(String),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Postgres(#[from] postgres::Error),
}

/// A stored row as the read path sees it, before it is turned into a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: RowId,
    /// GeoJSON text of the geometry column, `None` for NULL.
    pub geometry: Option<String>,
    pub properties: Option<serde_json::Value>,
}

/// Exclusive transactional session. Dropping a session without calling
/// `commit` rolls it back.
pub trait StoreSession {
    /// Insert one feature given its GeoJSON geometry text and JSON properties.
    fn insert(&mut self, geometry: &str, properties: &serde_json::Value)
        -> Result<RowId, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

pub trait SpatialStore {
    /// Create the feature table if it does not exist yet.
    fn ensure_schema(&mut self) -> Result<(), StoreError>;

    /// Open an exclusive session. The session borrows the store mutably, so it
    /// can never be shared between concurrent batches.
    fn begin(&mut self) -> Result<Box<dyn StoreSession + '_>, StoreError>;

    fn select_all(&mut self) -> Result<Vec<StoredRow>, StoreError>;

    /// Rows whose geometry lies within `radius_meters` of (`lon`, `lat`),
    /// measured on the WGS84 ellipsoid.
    fn select_within(
        &mut self,
        lon: f64,
        lat: f64,
        radius_meters: f64,
    ) -> Result<Vec<StoredRow>, StoreError>;
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted.
pub fn validate_table_name(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && name.len() <= 63
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}
