use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::sql_functions::register_spatial_functions;
use super::{validate_table_name, RowId, SpatialStore, StoreError, StoreSession, StoredRow};

/// Embedded spatial store on top of SQLite.
///
/// Geometries are kept as canonical GeoJSON text and the spatial SQL
/// functions are provided by [`register_spatial_functions`], so the queries
/// have the same shape as their PostGIS counterparts.
pub struct SqliteStore {
    connection: Connection,
    table: String,
}

impl SqliteStore {
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        let connection = Connection::open(path)
            .map_err(|err| StoreError::Connection(format!("{:?}: {}", path, err)))?;
        Self::from_connection(connection, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Self::from_connection(connection, table)
    }

    fn from_connection(connection: Connection, table: &str) -> Result<Self, StoreError> {
        let table = validate_table_name(table)?.to_string();
        register_spatial_functions(&connection)?;
        let mut store = Self { connection, table };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Raw connection, for maintenance statements outside the feature API.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let count = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    fn select(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredRow>, StoreError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok((
                row.get::<_, RowId>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut stored_rows = Vec::new();
        for row in rows {
            let (id, geometry, properties) = row?;
            let properties = properties.and_then(|text| match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::warn!("Row {} has unreadable properties: {}", id, err);
                    None
                }
            });
            stored_rows.push(StoredRow {
                id,
                geometry,
                properties,
            });
        }
        Ok(stored_rows)
    }
}

struct SqliteSession<'c> {
    transaction: rusqlite::Transaction<'c>,
    insert_sql: String,
}

impl StoreSession for SqliteSession<'_> {
    fn insert(
        &mut self,
        geometry: &str,
        properties: &serde_json::Value,
    ) -> Result<RowId, StoreError> {
        let id = self
            .transaction
            .query_row(
                &self.insert_sql,
                params![geometry, properties.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::Rejected("insert returned no row id".to_string()))?;
        Ok(id)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.transaction.commit()?)
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.transaction.rollback()?)
    }
}

impl SpatialStore for SqliteStore {
    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                geom TEXT,
                properties TEXT CHECK (properties IS NULL OR json_valid(properties))
            );",
            table = self.table
        ))?;
        Ok(())
    }

    fn begin(&mut self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        let insert_sql = format!(
            "INSERT INTO {} (geom, properties) VALUES (ST_GeomFromGeoJSON(?1), json(?2)) RETURNING id",
            self.table
        );
        // IMMEDIATE takes the write lock up front, a second writer waits or
        // fails at begin instead of halfway through the batch.
        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Box::new(SqliteSession {
            transaction,
            insert_sql,
        }))
    }

    fn select_all(&mut self) -> Result<Vec<StoredRow>, StoreError> {
        self.select(
            &format!(
                "SELECT id, ST_AsGeoJSON(geom), properties FROM {} ORDER BY id",
                self.table
            ),
            [],
        )
    }

    fn select_within(
        &mut self,
        lon: f64,
        lat: f64,
        radius_meters: f64,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.select(
            &format!(
                "SELECT id, ST_AsGeoJSON(geom), properties FROM {} \
                 WHERE ST_DWithin(geom, ?1, ?2, ?3) ORDER BY id",
                self.table
            ),
            params![lon, lat, radius_meters],
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use testdir::testdir;

    use super::SqliteStore;
    use crate::store::{SpatialStore, StoreError, StoreSession};

    const POINT: &str = r#"{"type":"Point","coordinates":[0.0,0.0]}"#;

    #[test]
    fn test_committed_session_is_visible() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let mut session = store.begin().unwrap();
        let first = session.insert(POINT, &json!({"name": "a"})).unwrap();
        let second = session.insert(POINT, &json!({"name": "b"})).unwrap();
        session.commit().unwrap();

        assert!(second > first);
        let rows = store.select_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].properties, Some(json!({"name": "a"})));
    }

    #[test]
    fn test_dropped_session_rolls_back() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        {
            let mut session = store.begin().unwrap();
            session.insert(POINT, &json!({})).unwrap();
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_invalid_geometry_is_rejected_by_the_store() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let mut session = store.begin().unwrap();
        let result = session.insert(r#"{"type":"Point"}"#, &json!({}));
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_select_within() {
        let mut store = SqliteStore::open_in_memory("features").unwrap();
        let mut session = store.begin().unwrap();
        session.insert(POINT, &json!({"name": "origin"})).unwrap();
        session
            .insert(r#"{"type":"Point","coordinates":[10.0,10.0]}"#, &json!({"name": "far"}))
            .unwrap();
        session.commit().unwrap();

        let rows = store.select_within(0.0, 0.0, 1_000.0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].properties, Some(json!({"name": "origin"})));
    }

    #[test]
    fn test_store_persists_across_connections() {
        let path = testdir!().join("features.sqlite");
        {
            let mut store = SqliteStore::open(&path, "parcels").unwrap();
            let mut session = store.begin().unwrap();
            session.insert(POINT, &json!({"id": 1})).unwrap();
            session.commit().unwrap();
        }
        let mut store = SqliteStore::open(&path, "parcels").unwrap();
        assert_eq!(store.select_all().unwrap().len(), 1);
    }

    #[test]
    fn test_unsafe_table_name_is_rejected() {
        assert!(matches!(
            SqliteStore::open_in_memory("features; DROP TABLE x"),
            Err(StoreError::InvalidTableName(_))
        ));
    }
}
