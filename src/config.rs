use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::normalize::InvalidGeometryPolicy;
use crate::store::{self, PostgisStore, SpatialStore, SqliteStore};

/// PostGIS connection settings. Fields left out of the config file are read from
/// the `DB_USER`, `DB_HOST`, `DB_DATABASE`, `DB_PASSWORD` and `DB_PORT`
/// environment variables.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PostgisConfig {
    pub user: Option<String>,
    pub host: Option<String>,
    pub database: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

/// Fully resolved PostGIS connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PostgisConnection {
    pub user: String,
    pub host: String,
    pub database: String,
    pub password: Option<String>,
    pub port: u16,
}

impl PostgisConfig {
    pub fn resolve(&self) -> anyhow::Result<PostgisConnection> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<PostgisConnection> {
        let pick = |value: &Option<String>, variable: &str| -> Option<String> {
            value.clone().or_else(|| lookup(variable))
        };
        let port = match self.port {
            Some(port) => port,
            None => match lookup("DB_PORT") {
                Some(port) => port
                    .parse()
                    .with_context(|| format!("DB_PORT {:?} is not a port number", port))?,
                None => 5432,
            },
        };
        Ok(PostgisConnection {
            user: pick(&self.user, "DB_USER")
                .ok_or_else(|| anyhow!("PostGIS user missing from config and DB_USER"))?,
            host: pick(&self.host, "DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            database: pick(&self.database, "DB_DATABASE")
                .ok_or_else(|| anyhow!("PostGIS database missing from config and DB_DATABASE"))?,
            password: pick(&self.password, "DB_PASSWORD"),
            port,
        })
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Sqlite { path: PathBuf },
    Postgis(PostgisConfig),
}

fn default_table_name() -> String {
    store::DEFAULT_TABLE_NAME.to_string()
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub on_invalid_geometry: InvalidGeometryPolicy,
    #[serde(default)]
    pub show_progress: bool,
}

impl Config {
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        store::validate_table_name(&config.table_name)?;
        Ok(config)
    }

    pub fn from_file(filepath: &Path) -> anyhow::Result<Self> {
        if !filepath.exists() {
            return Err(anyhow!("Config file {:?} not found", filepath));
        }
        let contents = std::fs::read_to_string(filepath)
            .with_context(|| format!("Reading config file {:?}", filepath))?;
        Self::from_yaml_str(&contents)
    }

    /// Connect to the configured store. Every call hands out an independent
    /// connection, so concurrent requests never share a session.
    pub fn open_store(&self) -> anyhow::Result<Box<dyn SpatialStore>> {
        let store: Box<dyn SpatialStore> = match &self.store {
            StoreConfig::Sqlite { path } => {
                log::debug!("Opening SQLite store at {:?}", path);
                Box::new(SqliteStore::open(path, &self.table_name)?)
            }
            StoreConfig::Postgis(postgis_config) => {
                let connection = postgis_config.resolve()?;
                log::debug!(
                    "Connecting to PostGIS at {}:{}/{}",
                    connection.host,
                    connection.port,
                    connection.database
                );
                Box::new(PostgisStore::connect(&connection, &self.table_name)?)
            }
        };
        Ok(store)
    }
}
