use postgres::{Client, NoTls, Row};

use super::{validate_table_name, RowId, SpatialStore, StoreError, StoreSession, StoredRow};
use crate::config::PostgisConnection;

/// Decimal digits requested from `ST_AsGeoJSON`. The PostGIS default of 9
/// would truncate coordinates and break the GeoJSON round trip.
const GEOJSON_MAX_DECIMAL_DIGITS: i32 = 15;

/// PostgreSQL/PostGIS store. The table holds a `geometry(Geometry, 4326)`
/// column and a `JSONB` properties column.
pub struct PostgisStore {
    client: Client,
    table: String,
}

impl PostgisStore {
    pub fn connect(connection: &PostgisConnection, table: &str) -> Result<Self, StoreError> {
        let table = validate_table_name(table)?.to_string();
        let mut config = postgres::Config::new();
        config
            .host(&connection.host)
            .port(connection.port)
            .user(&connection.user)
            .dbname(&connection.database);
        if let Some(password) = &connection.password {
            config.password(password);
        }
        let client = config
            .connect(NoTls)
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Ok(Self { client, table })
    }

    fn select_sql(&self, filter: &str) -> String {
        format!(
            "SELECT id, ST_AsGeoJSON(geom, {}), properties FROM {} {} ORDER BY id",
            GEOJSON_MAX_DECIMAL_DIGITS, self.table, filter
        )
    }
}

fn stored_row(row: &Row) -> Result<StoredRow, StoreError> {
    Ok(StoredRow {
        id: row.try_get::<_, i64>(0)?,
        geometry: row.try_get::<_, Option<String>>(1)?,
        properties: row.try_get::<_, Option<serde_json::Value>>(2)?,
    })
}

struct PostgisSession<'a> {
    transaction: postgres::Transaction<'a>,
    insert_sql: String,
}

impl StoreSession for PostgisSession<'_> {
    fn insert(
        &mut self,
        geometry: &str,
        properties: &serde_json::Value,
    ) -> Result<RowId, StoreError> {
        let row = self
            .transaction
            .query_one(self.insert_sql.as_str(), &[&geometry, properties])?;
        Ok(row.try_get::<_, i64>(0)?)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.transaction.commit()?)
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.transaction.rollback()?)
    }
}

impl SpatialStore for PostgisStore {
    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.client.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                geom geometry(Geometry, 4326),
                properties JSONB
            );
            CREATE INDEX IF NOT EXISTS {table}_geog_idx ON {table} USING GIST ((geom::geography));",
            table = self.table
        ))?;
        Ok(())
    }

    fn begin(&mut self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        let insert_sql = format!(
            "INSERT INTO {} (geom, properties) \
             VALUES (ST_SetSRID(ST_GeomFromGeoJSON($1::text), 4326), $2) RETURNING id",
            self.table
        );
        let transaction = self.client.transaction()?;
        Ok(Box::new(PostgisSession {
            transaction,
            insert_sql,
        }))
    }

    fn select_all(&mut self) -> Result<Vec<StoredRow>, StoreError> {
        let sql = self.select_sql("");
        self.client.query(sql.as_str(), &[])?.iter().map(stored_row).collect()
    }

    fn select_within(
        &mut self,
        lon: f64,
        lat: f64,
        radius_meters: f64,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let sql = self.select_sql(
            "WHERE ST_DWithin(geom::geography, \
             ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography, $3)",
        );
        self.client
            .query(sql.as_str(), &[&lon, &lat, &radius_meters])?
            .iter()
            .map(stored_row)
            .collect()
    }
}
