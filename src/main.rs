extern crate log;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use shape_store::config::Config;
use shape_store::error::StoreUnavailableError;
use shape_store::geofile::gdal_geofile::{write_features_to_geofile, GdalDriverType};
use shape_store::geofile::geojson::write_feature_collection;
use shape_store::geofile::shapefile::BundleSource;
use shape_store::normalize::InvalidGeometryPolicy;
use shape_store::pipeline::{ingest_bundle, IngestOptions};
use shape_store::query::{list_all, list_near, QueryOutcome, QueryPoint};
use shape_store::store::{SpatialStore, StoreError};

/// Load shapefiles into a spatial store and query them back as GeoJSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the feature table if it does not exist.
    Init,
    /// Ingest a shapefile bundle: a .zip archive, a .shp file or a directory.
    Ingest {
        bundle: PathBuf,
        /// Overrides `on_invalid_geometry` from the config file.
        #[arg(long, value_enum)]
        on_invalid_geometry: Option<InvalidGeometryPolicy>,
    },
    /// Print every stored feature as a GeoJSON feature collection.
    List {
        /// Write the collection to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Features within a geodesic radius of a point.
    Near {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters.
        #[arg(long)]
        radius: f64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export every stored feature to a GDAL vector file.
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value = "GPKG")]
        driver: GdalDriverType,
    },
}

/// Failure of a command, either from the pipeline or from the surroundings
/// (config, files). Pipeline errors keep their own exit code.
enum Failure {
    Pipeline(shape_store::Error),
    Other(anyhow::Error),
}

impl From<shape_store::Error> for Failure {
    fn from(error: shape_store::Error) -> Self {
        Failure::Pipeline(error)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Failure::Other(error)
    }
}

fn print_outcome(outcome: &QueryOutcome, output: Option<&Path>) -> anyhow::Result<()> {
    if !outcome.skipped_rows.is_empty() {
        log::warn!("{} rows were skipped", outcome.skipped_rows.len());
    }
    match output {
        Some(output) => {
            write_feature_collection(&outcome.collection, output)
                .with_context(|| format!("Writing {:?}", output))?;
            log::info!("Wrote {} features to {:?}", outcome.len(), output);
        }
        None => println!("{}", geojson::GeoJson::from(outcome.collection.clone())),
    }
    Ok(())
}

fn run(config: &Config, store: &mut dyn SpatialStore, command: Command) -> Result<(), Failure> {
    match command {
        Command::Init => {
            store
                .ensure_schema()
                .context("Creating the feature table")?;
            log::info!("Table {} is ready", config.table_name);
        }
        Command::Ingest {
            bundle,
            on_invalid_geometry,
        } => {
            let options = IngestOptions {
                on_invalid_geometry: on_invalid_geometry.unwrap_or(config.on_invalid_geometry),
                show_progress: config.show_progress,
            };
            log::info!("Ingesting {:?}", bundle);
            let report = ingest_bundle(&BundleSource::Path(bundle), store, options)?;
            println!("{}", report.to_response_body());
        }
        Command::List { output } => {
            let outcome = list_all(store)?;
            print_outcome(&outcome, output.as_deref())?;
        }
        Command::Near {
            lat,
            lon,
            radius,
            output,
        } => {
            let point = QueryPoint::new(lat, lon).map_err(shape_store::Error::from)?;
            let outcome = list_near(store, point, radius)?;
            print_outcome(&outcome, output.as_deref())?;
        }
        Command::Export { output, driver } => {
            let features = list_all(store)?.into_features();
            write_features_to_geofile(&features, &output, None, driver)?;
            log::info!("Exported {} features to {:?}", features.len(), output);
        }
    }
    Ok(())
}

fn try_main() -> Result<(), Failure> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    let mut store = config
        .open_store()
        .map_err(|err| match err.downcast::<StoreError>() {
            Ok(source) => Failure::Pipeline(StoreUnavailableError { source }.into()),
            Err(err) => Failure::Other(err.context("Opening the spatial store")),
        })?;
    run(&config, store.as_mut(), args.command)
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    match try_main() {
        Ok(()) => {}
        Err(Failure::Pipeline(error)) => {
            println!("{}", error.to_response_body());
            std::process::exit(error.exit_code())
        }
        Err(Failure::Other(error)) => {
            eprintln!("Error: {:?}", error);
            std::process::exit(1)
        }
    }
}
