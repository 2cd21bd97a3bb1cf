extern crate log;
pub mod config;
pub mod crs;
pub mod error;
pub mod geofile;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod query;
pub mod store;

pub use error::{Error, Result};
